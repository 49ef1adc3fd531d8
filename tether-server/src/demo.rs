//! Example commands served by the `tether-server` daemon

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use tether_protocol::{ContextKind, ParamShape};
use tether_utils::{Result, TetherError};

use crate::cache::ShellCache;
use crate::registry::{Args, Command};

/// Every demo command, sharing `cache`
pub fn demo_commands(cache: Arc<dyn ShellCache>) -> Vec<Command> {
    vec![
        echo(),
        sum(),
        sleep(),
        progress(),
        cache_set(Arc::clone(&cache)),
        cache_get(cache),
    ]
}

fn non_negative(args: &Args, name: &str) -> Result<u64> {
    let value = args.integer(name)?;
    u64::try_from(value)
        .map_err(|_| TetherError::invalid_argument(args.command(), format!("'{}' must not be negative", name)))
}

fn echo() -> Command {
    Command::builder("echo")
        .help("Print the given text")
        .param(ParamShape::string("text").required())
        .param(ParamShape::flag("upper").help("Upper-case the text"))
        .handler(|args| async move {
            let text = args.string("text")?;
            Ok(Some(if args.boolean("upper") {
                text.to_uppercase()
            } else {
                text.to_string()
            }))
        })
}

fn sum() -> Command {
    Command::builder("sum")
        .help("Add two integers")
        .param(ParamShape::integer("a").required())
        .param(ParamShape::integer("b").required())
        .handler(|args| async move {
            let a = args.integer("a")?;
            let b = args.integer("b")?;
            let total = a
                .checked_add(b)
                .ok_or_else(|| TetherError::command_failed("sum", "integer overflow"))?;
            Ok(Some(total.to_string()))
        })
}

fn sleep() -> Command {
    Command::builder("sleep")
        .help("Wait for a number of milliseconds; can be interrupted")
        .param(ParamShape::integer("millis").required())
        .param(ParamShape::context("ctx", ContextKind::Simple))
        .handler(|args| async move {
            let millis = non_negative(&args, "millis")?;
            let ctx = args
                .simple_context()
                .ok_or_else(|| TetherError::internal("sleep runs without a context"))?;

            ctx.print(format!("sleeping {} ms", millis)).await?;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                    ctx.print("awake").await?;
                }
                _ = ctx.interrupted() => {
                    debug!(context = ctx.id(), "Sleep interrupted");
                    ctx.print("interrupted").await?;
                }
            }
            ctx.completed().await;
            Ok(None)
        })
}

fn progress() -> Command {
    Command::builder("progress")
        .help("Report progress from a background task")
        .param(ParamShape::integer("steps").required())
        .param(ParamShape::context("ctx", ContextKind::Progress))
        .param(ParamShape::integer("delay-ms").help("Pause between steps (default 100)"))
        .handler(|args| async move {
            let steps = non_negative(&args, "steps")?;
            let delay = match args.optional_integer("delay-ms") {
                Some(_) => non_negative(&args, "delay-ms")?,
                None => 100,
            };
            let ctx = args
                .progress_context()
                .ok_or_else(|| TetherError::internal("progress runs without a context"))?
                .clone();

            // The command returns at once; the context stays running until
            // the background task completes it.
            tokio::spawn(async move {
                for step in 1..=steps {
                    if ctx.is_interrupted() {
                        if let Err(e) = ctx.print("cancelled").await {
                            debug!(context = ctx.id(), "Cancel notice not sent: {}", e);
                        }
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    if ctx.print_progress("progress", step, steps).await.is_err() {
                        break;
                    }
                }
                ctx.completed().await;
            });
            Ok(None)
        })
}

fn cache_set(cache: Arc<dyn ShellCache>) -> Command {
    Command::builder("cache-set")
        .help("Store a value in the shell cache")
        .param(ParamShape::string("key").required())
        .param(ParamShape::string("value").required())
        .param(ParamShape::integer("ttl").help("Expiry in seconds"))
        .handler(move |args| {
            let cache = Arc::clone(&cache);
            async move {
                let key = args.string("key")?;
                let value = Value::String(args.string("value")?.to_string());
                let expire = match args.optional_integer("ttl") {
                    Some(_) => Some(Duration::from_secs(non_negative(&args, "ttl")?)),
                    None => None,
                };
                cache.set(key, value, expire)?;
                Ok(Some("OK".to_string()))
            }
        })
}

fn cache_get(cache: Arc<dyn ShellCache>) -> Command {
    Command::builder("cache-get")
        .help("Read a value from the shell cache")
        .param(ParamShape::string("key").required())
        .handler(move |args| {
            let cache = Arc::clone(&cache);
            async move {
                let key = args.string("key")?;
                let rendered = match cache.get(key)? {
                    Some(Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => "(nil)".to_string(),
                };
                Ok(Some(rendered))
            }
        })
}
