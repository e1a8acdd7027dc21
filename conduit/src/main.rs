use std::io::Write;

use anyhow::Context;
use args::Args;
use clap::Parser;
use config::Config;
use llm::{
    ChatOptions, Components,
    callbacks::{Callbacks, LogHandler},
};
use schema::Message;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_filter)?;

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let concatenator = Components::concatenator_for(&config);
    let callbacks = Callbacks::new().with_handler(LogHandler::new(concatenator.clone()));
    let components = Components::with_concatenator(&config, concatenator, callbacks)?;

    let provider = match &args.provider {
        Some(provider) => provider.clone(),
        None => components
            .provider_names()
            .next()
            .map(str::to_string)
            .context("No provider configured")?,
    };

    if args.embed {
        let embedder = components.embedder(&provider)?;
        let vectors = embedder.embed(std::slice::from_ref(&args.prompt)).await?;

        for vector in vectors {
            let values: Vec<_> = vector.iter().map(f64::to_string).collect();
            println!("[{}]", values.join(", "));
        }

        return Ok(());
    }

    let model = components.chat_model(&provider)?;

    let mut messages = Vec::with_capacity(2);

    if let Some(system) = &args.system {
        messages.push(Message::system(system.clone()));
    }

    messages.push(Message::user(args.prompt.clone()));

    let options = ChatOptions {
        model: args.model.clone(),
        ..ChatOptions::default()
    };

    let message = if args.no_stream {
        let message = model.generate(&messages, &options).await?;
        println!("{}", message.content);

        message
    } else {
        let mut reader = model.stream(&messages, &options).await?;
        let mut deltas = Vec::new();
        let mut stdout = std::io::stdout();

        while let Some(delta) = reader.recv().await {
            let delta = delta?;

            write!(stdout, "{}", delta.content)?;
            stdout.flush()?;

            deltas.push(delta);
        }

        writeln!(stdout)?;

        components.concatenator().concat(&deltas)?
    };

    summarize(&message);

    Ok(())
}

/// Prints tool calls, finish reason and usage to stderr.
fn summarize(message: &Message) {
    for call in &message.tool_calls {
        eprintln!("tool call {}: {}({})", call.id, call.function.name, call.function.arguments);
    }

    if let Some(reason) = message.finish_reason() {
        eprintln!("finish reason: {reason}");
    }

    match message.usage() {
        Some(usage) => eprintln!(
            "usage: {} prompt + {} completion = {} tokens",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        ),
        None => eprintln!("usage: not reported"),
    }
}
