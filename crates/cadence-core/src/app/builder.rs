//! ServiceBuilder - service の組み立て
//!
//! store と directory は必須、それ以外は省略すると既定の実装になります。
//!
//! | 部品 | 既定 |
//! |------|------|
//! | clock | `SystemClock` |
//! | id generator | `UlidGenerator`（同じ clock を使う） |
//! | parser | `LiteParser` |
//! | config | `ServiceConfig::default()` |

use std::sync::Arc;

use crate::app::owner::OwnerResolver;
use crate::app::service::KvTaskService;
use crate::domain::config::ServiceConfig;
use crate::ports::kv::Store;
use crate::ports::{Clock, Directory, IdGenerator, ScriptParser, SystemClock, UlidGenerator};
use crate::script::LiteParser;

/// ServiceBuilder は `KvTaskService` を構築
///
/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new(store)
///     .directory(directory)
///     .config(config)
///     .build()?;
/// ```
pub struct ServiceBuilder<S> {
    store: S,
    directory: Option<Arc<dyn Directory>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    parser: Option<Arc<dyn ScriptParser>>,
    config: ServiceConfig,
}

/// BuildError は service 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("a directory is required to build the task service")]
    MissingDirectory,
}

impl<S: Store> ServiceBuilder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            directory: None,
            clock: None,
            ids: None,
            parser: None,
            config: ServiceConfig::default(),
        }
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn ScriptParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<KvTaskService<S>, BuildError> {
        let directory = self.directory.ok_or(BuildError::MissingDirectory)?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))) as Arc<dyn IdGenerator>);
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(LiteParser::new()) as Arc<dyn ScriptParser>);

        Ok(KvTaskService {
            store: self.store,
            owners: OwnerResolver::new(Arc::clone(&directory)),
            directory,
            clock,
            ids,
            parser,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryStore, KvDirectory};

    #[test]
    fn build_without_directory_fails() {
        let result = ServiceBuilder::new(InMemoryStore::new()).build();
        assert!(matches!(result, Err(BuildError::MissingDirectory)));
    }

    #[test]
    fn build_uses_supplied_config() {
        let directory = Arc::new(KvDirectory::new(InMemoryStore::new()));
        let config = ServiceConfig {
            max_page_size: 10,
            ..ServiceConfig::default()
        };
        let service = ServiceBuilder::new(InMemoryStore::new())
            .directory(directory)
            .config(config.clone())
            .build()
            .unwrap();
        assert_eq!(service.config(), &config);
    }
}
