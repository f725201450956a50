//! Variable reference resolution.
//!
//! A variable value may embed `${name}` (another variable) or `${table:id}`
//! (an attribute of a desired resource). Table names may be singular or
//! plural. Each table contributes one attribute:
//!
//! | table    | value        |
//! |----------|--------------|
//! | disk     | device       |
//! | mount    | mountpoint   |
//! | path     | path         |
//! | var      | resolved value |
//! | module   | source       |
//! | link     | id           |
//! | exposure | port         |

use std::collections::BTreeMap;

use thiserror::Error;
use zeropoint_core::{ResourceRow, ResourceTable, Snapshot, VarRow};

use crate::command::CommandContext;

/// A variable whose value could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved reference {reference} in var {var}: {message}")]
pub struct UnresolvedVar {
    /// Variable whose value holds the bad reference.
    pub var: String,
    /// The reference as written, e.g. `${path:media}`.
    pub reference: String,
    pub message: String,
}

/// Resolves every variable of a desired snapshot.
pub struct VarResolver<'a> {
    desired: &'a Snapshot,
    ctx: &'a CommandContext,
    resolved: BTreeMap<String, String>,
}

impl<'a> VarResolver<'a> {
    pub fn new(desired: &'a Snapshot, ctx: &'a CommandContext) -> Self {
        Self {
            desired,
            ctx,
            resolved: BTreeMap::new(),
        }
    }

    /// Resolve all variables, in id order. Stops at the first failure.
    pub fn resolve_all(mut self) -> Result<BTreeMap<String, String>, UnresolvedVar> {
        let ids: Vec<String> = self
            .desired
            .typed::<VarRow>()
            .map(|var| var.id.clone())
            .collect();
        for id in ids {
            let mut stack = Vec::new();
            self.resolve_var(&id, &mut stack)?;
        }
        Ok(self.resolved)
    }

    fn resolve_var(&mut self, id: &str, stack: &mut Vec<String>) -> Result<String, UnresolvedVar> {
        if let Some(value) = self.resolved.get(id) {
            return Ok(value.clone());
        }

        let raw = self
            .desired
            .get(ResourceTable::Vars, id)
            .and_then(ResourceRow::as_typed::<VarRow>)
            .and_then(|var| var.value.clone())
            .unwrap_or_default();

        stack.push(id.to_string());
        let value = self.expand(id, &raw, stack)?;
        stack.pop();

        self.resolved.insert(id.to_string(), value.clone());
        Ok(value)
    }

    fn expand(&mut self, var: &str, raw: &str, stack: &mut Vec<String>) -> Result<String, UnresolvedVar> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(UnresolvedVar {
                    var: var.to_string(),
                    reference: rest[start..].to_string(),
                    message: "unterminated reference".to_string(),
                });
            };

            let inner = &after[..end];
            let reference = format!("${{{inner}}}");
            let value = self
                .lookup(inner, stack)
                .map_err(|message| UnresolvedVar {
                    var: var.to_string(),
                    reference,
                    message,
                })?;
            out.push_str(&value);
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&mut self, inner: &str, stack: &mut Vec<String>) -> Result<String, String> {
        let (table, id) = match inner.split_once(':') {
            Some((table, id)) => {
                let table = ResourceTable::from_reference(table.trim())
                    .ok_or_else(|| format!("unknown table {:?}", table.trim()))?;
                (table, id.trim())
            }
            None => (ResourceTable::Vars, inner.trim()),
        };

        if table == ResourceTable::Vars {
            return self.lookup_var(id, stack);
        }

        let desired = self.desired;
        let row = desired
            .get(table, id)
            .ok_or_else(|| format!("no {} with id {:?}", table.singular(), id))?;

        match row {
            ResourceRow::Disk(disk) => Ok(self
                .ctx
                .output_field(ResourceTable::Disks, id, "device")
                .unwrap_or(disk.device.as_str())
                .to_string()),
            ResourceRow::Mount(mount) => Ok(mount.mountpoint.clone()),
            ResourceRow::Path(path) => Ok(path.path.clone()),
            ResourceRow::Module(module) => Ok(module.source.clone()),
            ResourceRow::Link(link) => Ok(link.id.clone()),
            ResourceRow::Exposure(exposure) => exposure
                .port
                .map(|port| port.to_string())
                .ok_or_else(|| format!("exposure {id:?} has no port")),
            ResourceRow::Var(_) => self.lookup_var(id, stack),
        }
    }

    fn lookup_var(&mut self, id: &str, stack: &mut Vec<String>) -> Result<String, String> {
        if stack.iter().any(|seen| seen == id) {
            let mut cycle = stack.clone();
            cycle.push(id.to_string());
            return Err(format!("reference cycle {}", cycle.join(" -> ")));
        }
        if !self.desired.contains(ResourceTable::Vars, id) {
            return Err(format!("no var with id {id:?}"));
        }
        // Nested failures carry the inner var's message.
        self.resolve_var(id, stack).map_err(|inner| inner.to_string())
    }
}
