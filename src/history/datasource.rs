//! Data source directory lookups
//!
//! Local records store the data source name and resolve the uid on read;
//! remote records store the uid and resolve the name. Both go through
//! `DatasourceDirectory`.

use std::collections::HashMap;

/// Resolves data source names and uids
pub trait DatasourceDirectory: Send + Sync {
    fn uid_for_name(&self, name: &str) -> Option<String>;
    fn name_for_uid(&self, uid: &str) -> Option<String>;
}

/// Directory backed by a fixed list of data sources
#[derive(Debug, Clone, Default)]
pub struct StaticDatasourceDirectory {
    by_name: HashMap<String, String>,
    by_uid: HashMap<String, String>,
}

impl StaticDatasourceDirectory {
    /// Build from `(name, uid)` pairs
    pub fn new<I, N, U>(datasources: I) -> Self
    where
        I: IntoIterator<Item = (N, U)>,
        N: Into<String>,
        U: Into<String>,
    {
        let mut directory = Self::default();
        for (name, uid) in datasources {
            directory.insert(name, uid);
        }
        directory
    }

    pub fn insert(&mut self, name: impl Into<String>, uid: impl Into<String>) {
        let name = name.into();
        let uid = uid.into();
        self.by_name.insert(name.clone(), uid.clone());
        self.by_uid.insert(uid, name);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl From<&[crate::config::DatasourceConfig]> for StaticDatasourceDirectory {
    fn from(datasources: &[crate::config::DatasourceConfig]) -> Self {
        Self::new(
            datasources
                .iter()
                .map(|ds| (ds.name.clone(), ds.uid.clone())),
        )
    }
}

impl DatasourceDirectory for StaticDatasourceDirectory {
    fn uid_for_name(&self, name: &str) -> Option<String> {
        self.by_name.get(name).cloned()
    }

    fn name_for_uid(&self, uid: &str) -> Option<String> {
        self.by_uid.get(uid).cloned()
    }
}
