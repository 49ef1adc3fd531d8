//! Command registry
//!
//! Maps command names to typed async handlers and binds raw command lines
//! to their declared parameters.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::debug;

use tether_protocol::{CommandDescriptor, ParamKind, ParamShape};
use tether_utils::{Result, TetherError};

use crate::context::{ProgressContext, ShellContext, SimpleContext};

/// What a command body returns; `Some` text is sent back to the client
pub type CommandOutput = Result<Option<String>>;

type Handler = Arc<dyn Fn(Args) -> BoxFuture<'static, CommandOutput> + Send + Sync>;

/// Bound value of one parameter
#[derive(Debug, Clone)]
pub enum Value {
    /// Optional parameter not given on the line
    Absent,
    String(String),
    Integer(i64),
    Boolean(bool),
    /// Injected invocation context
    Context(ShellContext),
}

/// One positional argument handed to a command
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

/// Arguments of one invocation, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Args {
    command: String,
    items: Vec<Argument>,
}

impl Args {
    pub fn new(command: impl Into<String>, items: Vec<Argument>) -> Self {
        Self {
            command: command.into(),
            items,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.items.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|argument| argument.name == name)
            .map(|argument| &argument.value)
    }

    /// Required string argument
    pub fn string(&self, name: &str) -> Result<&str> {
        self.optional_string(name)
            .ok_or_else(|| self.missing(name, "string"))
    }

    pub fn optional_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Required integer argument
    pub fn integer(&self, name: &str) -> Result<i64> {
        self.optional_integer(name)
            .ok_or_else(|| self.missing(name, "integer"))
    }

    pub fn optional_integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    /// Flag value; false when absent
    pub fn boolean(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Value::Boolean(true)))
    }

    /// The injected context, if the command declared one
    pub fn context(&self) -> Option<&ShellContext> {
        self.items.iter().find_map(|argument| match &argument.value {
            Value::Context(ctx) => Some(ctx),
            _ => None,
        })
    }

    pub fn simple_context(&self) -> Option<&SimpleContext> {
        self.context().and_then(ShellContext::as_simple)
    }

    pub fn progress_context(&self) -> Option<&ProgressContext> {
        self.context().and_then(ShellContext::as_progress)
    }

    /// Place a context at `position`, appending when out of range
    pub(crate) fn insert_context(&mut self, position: usize, name: String, ctx: ShellContext) {
        let argument = Argument {
            name,
            value: Value::Context(ctx),
        };
        if position <= self.items.len() {
            self.items.insert(position, argument);
        } else {
            self.items.push(argument);
        }
    }

    fn missing(&self, name: &str, kind: &str) -> TetherError {
        TetherError::invalid_argument(&self.command, format!("no {} argument '{}'", kind, name))
    }
}

/// A registered command: descriptor plus handler
#[derive(Clone)]
pub struct Command {
    descriptor: CommandDescriptor,
    handler: Handler,
}

impl Command {
    pub fn builder(name: impl Into<String>) -> CommandBuilder {
        CommandBuilder {
            descriptor: CommandDescriptor::new(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    /// Run the command body
    pub fn invoke(&self, args: Args) -> BoxFuture<'static, CommandOutput> {
        (self.handler)(args)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Builder for [`Command`]
#[derive(Debug)]
pub struct CommandBuilder {
    descriptor: CommandDescriptor,
}

impl CommandBuilder {
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.descriptor.help = Some(help.into());
        self
    }

    pub fn param(mut self, param: ParamShape) -> Self {
        self.descriptor.params.push(param);
        self
    }

    /// Attach the body and finish the command
    pub fn handler<F, Fut>(self, handler: F) -> Command
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandOutput> + Send + 'static,
    {
        Command {
            descriptor: self.descriptor,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }
}

/// Name-keyed command table
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: RwLock<BTreeMap<String, Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command; names must be unique
    pub fn register(&self, command: Command) -> Result<()> {
        let mut commands = self.commands.write();
        if commands.contains_key(command.name()) {
            return Err(TetherError::config(format!(
                "command '{}' is already registered",
                command.name()
            )));
        }
        debug!(command = command.name(), "Registered command");
        commands.insert(command.name().to_string(), command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Command> {
        self.commands.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }

    /// Descriptors of every command, sorted by name
    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        self.commands
            .read()
            .values()
            .map(|command| command.descriptor.clone())
            .collect()
    }

    /// Find the command for `line` and bind its line arguments
    ///
    /// Context parameters are left out; the caller injects them.
    pub fn resolve(&self, line: &str) -> Result<(Command, Args)> {
        let tokens = tokenize(line).map_err(|message| TetherError::invalid_argument(line, message))?;
        let Some((name, rest)) = tokens.split_first() else {
            return Err(TetherError::UnknownCommand(String::new()));
        };
        let command = self
            .get(name)
            .ok_or_else(|| TetherError::UnknownCommand(name.clone()))?;
        let items = bind(&command.descriptor, rest)?;
        Ok((command, Args::new(name.clone(), items)))
    }
}

/// Split a command line into words
///
/// Whitespace separates words. Single quotes are literal, double quotes
/// allow backslash escapes, and a backslash outside quotes escapes the next
/// character.
pub fn tokenize(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => current.push(c),
            (Some('"'), '"') => quote = None,
            (_, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_token = true;
                }
                None => return Err("dangling escape at end of line".into()),
            },
            (Some(_), _) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, _) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(open) = quote {
        return Err(format!("unterminated {} quote", open));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Bind words to the non-context parameters of `descriptor`
fn bind(descriptor: &CommandDescriptor, words: &[String]) -> Result<Vec<Argument>> {
    let command = descriptor.name.as_str();
    let params: Vec<&ParamShape> = descriptor.line_params().collect();
    let mut values: Vec<Option<Value>> = vec![None; params.len()];
    let mut positionals = Vec::new();

    let mut words = words.iter();
    let mut options_done = false;
    while let Some(word) = words.next() {
        let option = match word.strip_prefix("--") {
            Some(option) if !options_done => option,
            _ => {
                positionals.push(word);
                continue;
            }
        };
        if option.is_empty() {
            options_done = true;
            continue;
        }

        let (name, inline) = match option.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (option, None),
        };
        let index = params
            .iter()
            .position(|param| param.name == name)
            .ok_or_else(|| TetherError::invalid_argument(command, format!("unknown option --{}", name)))?;
        let param = params[index];
        let raw = match (param.kind, inline) {
            (_, Some(value)) => value,
            (ParamKind::Boolean, None) => "true".to_string(),
            (_, None) => words.next().cloned().ok_or_else(|| {
                TetherError::invalid_argument(command, format!("option --{} needs a value", name))
            })?,
        };
        values[index] = Some(parse_value(command, param, &raw)?);
    }

    // Positionals fill the remaining non-flag parameters in order
    let mut open = params
        .iter()
        .enumerate()
        .filter(|(index, param)| values[*index].is_none() && param.kind != ParamKind::Boolean)
        .map(|(index, _)| index)
        .collect::<Vec<_>>()
        .into_iter();
    for word in positionals {
        let index = open.next().ok_or_else(|| {
            TetherError::invalid_argument(command, format!("unexpected argument '{}'", word))
        })?;
        values[index] = Some(parse_value(command, params[index], word)?);
    }

    params
        .iter()
        .zip(values)
        .map(|(param, value)| {
            let value = match value {
                Some(value) => value,
                None if param.required => {
                    return Err(TetherError::invalid_argument(
                        command,
                        format!("missing required argument '{}'", param.name),
                    ))
                }
                None if param.kind == ParamKind::Boolean => Value::Boolean(false),
                None => Value::Absent,
            };
            Ok(Argument {
                name: param.name.clone(),
                value,
            })
        })
        .collect()
}

fn parse_value(command: &str, param: &ParamShape, raw: &str) -> Result<Value> {
    match param.kind {
        ParamKind::String => Ok(Value::String(raw.to_string())),
        ParamKind::Integer => raw.parse::<i64>().map(Value::Integer).map_err(|_| {
            TetherError::invalid_argument(
                command,
                format!("'{}' expects an integer, got '{}'", param.name, raw),
            )
        }),
        ParamKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Boolean(true)),
            "false" | "no" | "0" => Ok(Value::Boolean(false)),
            _ => Err(TetherError::invalid_argument(
                command,
                format!("'{}' expects true or false, got '{}'", param.name, raw),
            )),
        },
        ParamKind::Context(_) => Err(TetherError::internal(format!(
            "context parameter '{}' cannot be bound from the command line",
            param.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::ContextKind;

    fn noop(name: &str) -> CommandBuilder {
        Command::builder(name)
    }

    fn registry() -> CommandRegistry {
        let registry = CommandRegistry::new();
        registry
            .register(
                noop("deploy")
                    .help("Roll out a build")
                    .param(ParamShape::string("target").required())
                    .param(ParamShape::integer("replicas"))
                    .param(ParamShape::flag("dry-run"))
                    .handler(|_| async { Ok(None) }),
            )
            .unwrap();
        registry
            .register(
                noop("copy")
                    .param(ParamShape::string("source").required())
                    .param(ParamShape::context("ctx", ContextKind::Progress))
                    .param(ParamShape::string("dest"))
                    .handler(|_| async { Ok(None) }),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_tokenize_quotes_and_escapes() {
        assert_eq!(
            tokenize(r#"echo 'a  b' "c \"d\"" e\ f"#).unwrap(),
            vec!["echo", "a  b", r#"c "d""#, "e f"]
        );
        assert_eq!(tokenize("  spaced   out  ").unwrap(), vec!["spaced", "out"]);
        assert_eq!(tokenize(r#"set key """#).unwrap(), vec!["set", "key", ""]);
        assert_eq!(tokenize(r"'single \n stays'").unwrap(), vec![r"single \n stays"]);
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert!(tokenize(r#"echo "open"#).is_err());
        assert!(tokenize("echo 'open").is_err());
        assert!(tokenize(r"echo trailing\").is_err());
    }

    #[test]
    fn test_resolve_positionals_and_options() {
        let registry = registry();
        let (command, args) = registry.resolve("deploy web --replicas 3 --dry-run").unwrap();
        assert_eq!(command.name(), "deploy");
        assert_eq!(args.string("target").unwrap(), "web");
        assert_eq!(args.integer("replicas").unwrap(), 3);
        assert!(args.boolean("dry-run"));

        let (_, args) = registry.resolve("deploy --replicas=5 api").unwrap();
        assert_eq!(args.string("target").unwrap(), "api");
        assert_eq!(args.optional_integer("replicas"), Some(5));
        assert!(!args.boolean("dry-run"));
    }

    #[test]
    fn test_optional_params_are_absent() {
        let registry = registry();
        let (_, args) = registry.resolve("deploy web").unwrap();
        assert_eq!(args.len(), 3);
        assert!(matches!(args.get("replicas"), Some(Value::Absent)));
        assert!(args.integer("replicas").is_err());
    }

    #[test]
    fn test_context_params_are_not_bound() {
        let registry = registry();
        let (command, args) = registry.resolve("copy a b").unwrap();
        assert_eq!(command.descriptor().context_slots(), vec![(1, ContextKind::Progress)]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.string("source").unwrap(), "a");
        assert_eq!(args.string("dest").unwrap(), "b");
        assert!(args.context().is_none());
    }

    #[test]
    fn test_resolution_failures() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("rollback web"),
            Err(TetherError::UnknownCommand(name)) if name == "rollback"
        ));
        assert!(matches!(registry.resolve(""), Err(TetherError::UnknownCommand(_))));

        for line in [
            "deploy",
            "deploy web 3 extra",
            "deploy web --replicas many",
            "deploy web --verbose",
            "deploy web --replicas",
            "deploy web --dry-run=maybe",
            "deploy \"web",
        ] {
            let result = registry.resolve(line);
            assert!(
                matches!(result, Err(TetherError::InvalidArgument { .. })),
                "expected argument error for {:?}",
                line
            );
        }
    }

    #[test]
    fn test_double_dash_ends_options() {
        let registry = registry();
        let (_, args) = registry.resolve("deploy -- --literal").unwrap();
        assert_eq!(args.string("target").unwrap(), "--literal");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = registry();
        let result = registry.register(noop("deploy").handler(|_| async { Ok(None) }));
        assert!(matches!(result, Err(TetherError::Config(_))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_multiple_context_params_accepted_at_registration() {
        let registry = CommandRegistry::new();
        registry
            .register(
                noop("broken")
                    .param(ParamShape::context("a", ContextKind::Simple))
                    .param(ParamShape::context("b", ContextKind::Simple))
                    .handler(|_| async { Ok(None) }),
            )
            .unwrap();
        assert_eq!(registry.get("broken").unwrap().descriptor().context_slots().len(), 2);
    }

    #[test]
    fn test_descriptors_sorted() {
        let names: Vec<_> = registry()
            .descriptors()
            .into_iter()
            .map(|descriptor| descriptor.name)
            .collect();
        assert_eq!(names, vec!["copy", "deploy"]);
    }

    #[tokio::test]
    async fn test_invoke_handler() {
        let registry = CommandRegistry::new();
        registry
            .register(
                noop("sum")
                    .param(ParamShape::integer("a").required())
                    .param(ParamShape::integer("b").required())
                    .handler(|args| async move {
                        let total = args.integer("a")? + args.integer("b")?;
                        Ok(Some(total.to_string()))
                    }),
            )
            .unwrap();

        let (command, args) = registry.resolve("sum 2 40").unwrap();
        assert_eq!(command.invoke(args).await.unwrap(), Some("42".to_string()));
    }
}
