//! Secondary index management over the info protocol

use tracing::info;

use aerie_core::{limits, Error, IndexDataType, IndexType, InfoPolicy, Result};
use aerie_wire::info::info_error;

use crate::executor::Executor;
use crate::job::IndexJob;

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Namespace
    pub namespace: String,
    /// Set, or every set when `None`
    pub set: Option<String>,
    /// Indexed bin
    pub bin: String,
    /// Index name, unique within the namespace
    pub name: String,
    /// Which values of the bin are indexed
    pub index_type: IndexType,
    /// Type of the indexed values
    pub data_type: IndexDataType,
}

impl IndexDefinition {
    /// A default-type index on `bin`.
    pub fn new(
        namespace: &str,
        set: Option<&str>,
        bin: &str,
        name: &str,
        data_type: IndexDataType,
    ) -> Self {
        IndexDefinition {
            namespace: namespace.to_string(),
            set: set.map(str::to_string),
            bin: bin.to_string(),
            name: name.to_string(),
            index_type: IndexType::Default,
            data_type,
        }
    }

    /// Index list items, map keys or map values instead of the bin itself.
    pub fn with_index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// The `sindex-create` info command.
    pub fn create_command(&self) -> Result<String> {
        limits::check_bin_name(&self.bin)?;
        if self.name.is_empty() || self.name.contains([';', ':', '=', '\n']) {
            return Err(Error::parameter(format!("invalid index name '{}'", self.name)));
        }
        let mut cmd = format!("sindex-create:ns={}", self.namespace);
        if let Some(set) = &self.set {
            cmd.push_str(&format!(";set={}", set));
        }
        cmd.push_str(&format!(
            ";indexname={};indexdata={},{}",
            self.name,
            self.bin,
            self.data_type.info_name()
        ));
        if self.index_type != IndexType::Default {
            cmd.push_str(&format!(";indextype={}", self.index_type.info_name()));
        }
        Ok(cmd)
    }
}

/// Run one info command on a random node and surface a `FAIL`/`ERROR` reply.
async fn info_ok(executor: &Executor, cmd: &str, policy: &InfoPolicy) -> Result<String> {
    let node = executor.cluster().random_node()?;
    let mut res = node.info(&[cmd], policy.timeout()).await?;
    let value = res.remove(cmd).unwrap_or_default();
    match info_error(&value) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}

pub(crate) async fn create_index(
    executor: &Executor,
    def: &IndexDefinition,
    policy: &InfoPolicy,
) -> Result<IndexJob> {
    let cmd = def.create_command()?;
    info_ok(executor, &cmd, policy).await?;
    info!(
        target: "aerie::exec",
        namespace = %def.namespace,
        index = %def.name,
        bin = %def.bin,
        "Created secondary index"
    );
    Ok(IndexJob::new(executor.clone(), &def.namespace, &def.name))
}

pub(crate) async fn remove_index(
    executor: &Executor,
    namespace: &str,
    name: &str,
    policy: &InfoPolicy,
) -> Result<()> {
    let cmd = format!("sindex-delete:ns={};indexname={}", namespace, name);
    info_ok(executor, &cmd, policy).await?;
    info!(target: "aerie::exec", namespace, index = name, "Removed secondary index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_default_type() {
        let def =
            IndexDefinition::new("test", Some("users"), "age", "idx_age", IndexDataType::Numeric);
        assert_eq!(
            def.create_command().unwrap(),
            "sindex-create:ns=test;set=users;indexname=idx_age;indexdata=age,NUMERIC"
        );
    }

    #[test]
    fn test_create_command_list_type_without_set() {
        let def = IndexDefinition::new("test", None, "tags", "idx_tags", IndexDataType::String)
            .with_index_type(IndexType::List);
        assert_eq!(
            def.create_command().unwrap(),
            "sindex-create:ns=test;indexname=idx_tags;indexdata=tags,STRING;indextype=LIST"
        );
    }

    #[test]
    fn test_create_command_rejects_bad_names() {
        let def = IndexDefinition::new("test", None, "a", "bad;name", IndexDataType::String);
        assert!(def.create_command().is_err());
        let def =
            IndexDefinition::new("test", None, "a_very_long_bin_name", "i", IndexDataType::String);
        assert!(def.create_command().is_err());
    }
}
