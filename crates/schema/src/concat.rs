use std::{
    collections::{BTreeMap, HashMap, btree_map::Entry},
    fmt,
    sync::Arc,
};

use crate::{ConcatError, Extra, ExtraValue, LogProbs, Message, ResponseMeta, ToolCall};

/// Pairwise merge function for one extra key.
///
/// Must be associative: merging `(a, b)` then `c` has to equal merging `a` with `(b, c)`.
/// Errors are reported as [`ConcatError::Extra`] for the key being merged.
pub type ExtraConcatFn = Arc<dyn Fn(ExtraValue, ExtraValue) -> Result<ExtraValue, String> + Send + Sync>;

/// Per-key concatenation functions for [`Extra`] values.
///
/// Filled once while the provider adapters are set up, then frozen into a [`Concatenator`].
#[derive(Clone, Default)]
pub struct ConcatRegistry {
    functions: HashMap<String, ExtraConcatFn>,
}

impl ConcatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the merge function for `key`.
    ///
    /// Returns `false` and keeps the existing function if the key was already registered.
    pub fn register<F>(&mut self, key: impl Into<String>, function: F) -> bool
    where
        F: Fn(ExtraValue, ExtraValue) -> Result<ExtraValue, String> + Send + Sync + 'static,
    {
        let key = key.into();

        if self.functions.contains_key(&key) {
            return false;
        }

        self.functions.insert(key, Arc::new(function));

        true
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.functions.contains_key(key)
    }

    fn merge(&self, key: &str, left: ExtraValue, right: ExtraValue) -> Result<ExtraValue, ConcatError> {
        match self.functions.get(key) {
            Some(function) => function(left, right).map_err(|reason| ConcatError::Extra {
                key: key.to_string(),
                reason,
            }),
            None => left.concat_default(key, right),
        }
    }
}

impl fmt::Debug for ConcatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.functions.keys().collect();
        keys.sort();

        f.debug_struct("ConcatRegistry").field("keys", &keys).finish()
    }
}

/// Folds the deltas of one logical response into a single message.
///
/// Cheap to clone; the registry is shared read-only between clones.
#[derive(Debug, Clone, Default)]
pub struct Concatenator {
    registry: Arc<ConcatRegistry>,
}

impl Concatenator {
    pub fn new(registry: ConcatRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ConcatRegistry {
        &self.registry
    }

    /// Concatenates `messages` in order.
    ///
    /// - content appends,
    /// - tool calls merge per index, arguments in arrival order,
    /// - the first non-empty finish reason wins, the last reported usage wins,
    /// - log probabilities append,
    /// - extra values merge per key with the registered function or the default rule.
    pub fn concat(&self, messages: &[Message]) -> Result<Message, ConcatError> {
        let first = messages.first().ok_or(ConcatError::Empty)?;

        let mut content = String::new();
        let mut name: Option<String> = None;
        let mut tool_call_id: Option<String> = None;
        let mut tool_calls = ToolCallMerger::default();
        let mut meta = MetaMerger::default();
        let mut extra: BTreeMap<String, ExtraValue> = BTreeMap::new();

        for message in messages {
            if message.role != first.role {
                return Err(ConcatError::RoleMismatch {
                    expected: first.role,
                    found: message.role,
                });
            }

            content.push_str(&message.content);
            keep_first_non_empty(&mut name, message.name.as_deref());
            keep_first_non_empty(&mut tool_call_id, message.tool_call_id.as_deref());

            for call in &message.tool_calls {
                tool_calls.push(call);
            }

            if let Some(response_meta) = &message.response_meta {
                meta.push(response_meta);
            }

            for (key, value) in message.extra.iter() {
                match extra.entry(key.to_string()) {
                    Entry::Vacant(entry) => {
                        entry.insert(value.clone());
                    }
                    Entry::Occupied(mut entry) => {
                        let (key, previous) = (entry.key().clone(), entry.get().clone());
                        entry.insert(self.registry.merge(&key, previous, value.clone())?);
                    }
                }
            }
        }

        Ok(Message {
            role: first.role,
            content,
            name,
            tool_calls: tool_calls.finish(),
            tool_call_id,
            response_meta: meta.finish(),
            extra: extra.into_iter().collect::<Extra>(),
        })
    }
}

/// Concatenates `messages` using only the default extra rules.
pub fn concat_messages(messages: &[Message]) -> Result<Message, ConcatError> {
    Concatenator::default().concat(messages)
}

fn keep_first_non_empty(slot: &mut Option<String>, candidate: Option<&str>) {
    if slot.is_none()
        && let Some(value) = candidate.filter(|value| !value.is_empty())
    {
        *slot = Some(value.to_string());
    }
}

#[derive(Default)]
struct ToolCallMerger {
    indexed: BTreeMap<u32, ToolCall>,
    unindexed: Vec<ToolCall>,
}

impl ToolCallMerger {
    fn push(&mut self, call: &ToolCall) {
        let Some(index) = call.index else {
            self.unindexed.push(call.clone());
            return;
        };

        match self.indexed.entry(index) {
            Entry::Vacant(entry) => {
                entry.insert(call.clone());
            }
            Entry::Occupied(mut entry) => entry.get_mut().absorb(call),
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.indexed.into_values().chain(self.unindexed).collect()
    }
}

#[derive(Default)]
struct MetaMerger {
    seen: bool,
    finish_reason: Option<String>,
    usage: Option<crate::TokenUsage>,
    logprobs: Option<LogProbs>,
}

impl MetaMerger {
    fn push(&mut self, meta: &ResponseMeta) {
        self.seen = true;

        keep_first_non_empty(&mut self.finish_reason, meta.finish_reason.as_deref());

        if meta.usage.is_some() {
            self.usage = meta.usage;
        }

        if let Some(logprobs) = &meta.logprobs {
            self.logprobs
                .get_or_insert_with(LogProbs::default)
                .content
                .extend(logprobs.content.iter().cloned());
        }
    }

    fn finish(self) -> Option<ResponseMeta> {
        self.seen.then(|| ResponseMeta {
            finish_reason: self.finish_reason,
            usage: self.usage,
            logprobs: self.logprobs,
        })
    }
}
