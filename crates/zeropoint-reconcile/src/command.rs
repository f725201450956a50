//! Commands and the registry that dispatches them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use zeropoint_core::{resource_key, CommandResult, Operation, ResourceRow, ResourceTable};

/// One idempotent state transition against a single resource.
///
/// Executing the same resource twice must report `applied` both times and
/// change nothing observable the second time. Precondition problems are
/// reported as `failed`, never raised.
#[async_trait]
pub trait Command: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Drive the host toward `resource`.
    async fn execute(&self, resource: &ResourceRow, ctx: &CommandContext) -> CommandResult;
}

/// Data available to commands during one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Caller-supplied trigger id, if any.
    pub trigger: Option<String>,

    vars: BTreeMap<String, String>,

    /// `table:id` -> output of the command that applied it.
    outputs: BTreeMap<String, Value>,
}

impl CommandContext {
    pub fn new(trigger: Option<String>) -> Self {
        Self {
            trigger,
            ..Default::default()
        }
    }

    /// Resolved value of a variable (available from the vars phase on).
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn set_vars(&mut self, vars: BTreeMap<String, String>) {
        self.vars = vars;
    }

    /// Output recorded for a resource earlier in this run.
    pub fn output(&self, table: ResourceTable, id: &str) -> Option<&Value> {
        self.outputs.get(&resource_key(table, id))
    }

    /// Look up a string field of a recorded output.
    pub fn output_field(&self, table: ResourceTable, id: &str, field: &str) -> Option<&str> {
        self.output(table, id)?.get(field)?.as_str()
    }

    pub fn record_output(&mut self, key: impl Into<String>, output: Value) {
        self.outputs.insert(key.into(), output);
    }
}

/// Maps `(table, operation)` to the command implementing it.
///
/// Built once at startup; lookups never inspect resource types at runtime.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: HashMap<(ResourceTable, Operation), Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    pub fn get(&self, table: ResourceTable, operation: Operation) -> Option<&Arc<dyn Command>> {
        self.commands.get(&(table, operation))
    }

    pub fn contains(&self, table: ResourceTable, operation: Operation) -> bool {
        self.commands.contains_key(&(table, operation))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered pairs in table then operation order.
    pub fn registered(&self) -> Vec<(ResourceTable, Operation)> {
        let mut keys: Vec<_> = self.commands.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Run the command registered for `resource`'s table and `operation`.
    ///
    /// A missing registration is a failed result naming the pair.
    pub async fn execute(
        &self,
        operation: Operation,
        resource: &ResourceRow,
        ctx: &CommandContext,
    ) -> CommandResult {
        let table = resource.table();
        let Some(command) = self.get(table, operation) else {
            return CommandResult::failed(format!(
                "no command registered for {table} {operation}"
            ));
        };

        let result = command.execute(resource, ctx).await;
        debug!(
            command = command.name(),
            resource = %resource.key(),
            %operation,
            status = ?result.status,
            "Command finished"
        );
        result
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.registered())
            .finish()
    }
}

/// Builder for [`CommandRegistry`].
#[derive(Default)]
pub struct CommandRegistryBuilder {
    commands: HashMap<(ResourceTable, Operation), Arc<dyn Command>>,
}

impl CommandRegistryBuilder {
    /// Register `command` for one table and operation, replacing any previous one.
    pub fn register(
        mut self,
        table: ResourceTable,
        operation: Operation,
        command: Arc<dyn Command>,
    ) -> Self {
        self.commands.insert((table, operation), command);
        self
    }

    /// Register one command for add, edit and release of `table`.
    pub fn register_all(self, table: ResourceTable, command: Arc<dyn Command>) -> Self {
        self.register(table, Operation::Add, command.clone())
            .register(table, Operation::Edit, command.clone())
            .register(table, Operation::Release, command)
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            commands: self.commands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zeropoint_core::{CommandStatus, VarRow};

    struct Echo;

    #[async_trait]
    impl Command for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
            CommandResult::applied_with(json!({ "id": resource.id() }))
        }
    }

    fn var(id: &str) -> ResourceRow {
        ResourceRow::Var(VarRow {
            id: id.into(),
            value: None,
        })
    }

    #[tokio::test]
    async fn test_dispatch_by_table_and_operation() {
        let registry = CommandRegistry::builder()
            .register(ResourceTable::Vars, Operation::Add, Arc::new(Echo))
            .build();

        let ctx = CommandContext::default();
        let result = registry.execute(Operation::Add, &var("a"), &ctx).await;
        assert!(result.is_applied());
        assert_eq!(result.output, Some(json!({"id": "a"})));

        let missing = registry.execute(Operation::Release, &var("a"), &ctx).await;
        assert_eq!(missing.status, CommandStatus::Failed);
        assert!(missing.error.unwrap().contains("vars release"));
    }

    #[test]
    fn test_register_all() {
        let registry = CommandRegistry::builder()
            .register_all(ResourceTable::Modules, Arc::new(Echo))
            .build();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(ResourceTable::Modules, Operation::Edit));
        assert!(!registry.contains(ResourceTable::Links, Operation::Add));
    }

    #[test]
    fn test_context_outputs() {
        let mut ctx = CommandContext::new(Some("t1".into()));
        ctx.record_output("disks:d1", json!({"device": "/dev/sdb1"}));
        assert_eq!(
            ctx.output_field(ResourceTable::Disks, "d1", "device"),
            Some("/dev/sdb1")
        );
        assert!(ctx.output(ResourceTable::Disks, "d2").is_none());
    }
}
