//! Wire formats shared between providers.

pub(crate) mod openai;
