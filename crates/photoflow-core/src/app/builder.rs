//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! 依存はすべて起動時に注入する（モジュールレベルのシングルトンは持たない）。
//! 起動時検証（Fail-fast）: 期待したステージにエージェントが揃っていなければ
//! build() が失敗する。

use std::sync::Arc;

use crate::agents::{Agent, AgentRegistry, RegistryError};
use crate::domain::Stage;
use crate::ports::TaskStore;

use super::dispatcher::Dispatcher;
use super::supervisor::{Supervisor, SupervisorConfig};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(store)
///     .register(Arc::new(color_agent))?
///     .register(Arc::new(publish_agent))?
///     .expect_stages(&Stage::all())
///     .build()?;
/// app.supervisor().run(shutdown_rx).await?;
/// ```
pub struct AppBuilder {
    store: Arc<dyn TaskStore>,
    registry: AgentRegistry,
    expected_stages: Option<Vec<Stage>>,
    config: SupervisorConfig,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing agents for stages: {0:?}. These stages were expected but have no agent.")]
    MissingStages(Vec<Stage>),
}

impl AppBuilder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            registry: AgentRegistry::new(),
            expected_stages: None,
            config: SupervisorConfig::default(),
        }
    }

    /// エージェントを登録（1 ステージ 1 エージェント）
    pub fn register(mut self, agent: Arc<dyn Agent>) -> Result<Self, RegistryError> {
        self.registry.register(agent)?;
        Ok(self)
    }

    /// 期待されるステージを設定
    pub fn expect_stages(mut self, stages: &[Stage]) -> Self {
        self.expected_stages = Some(stages.to_vec());
        self
    }

    pub fn supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// # 検証
    /// - expect_stages() で設定されたステージが全て登録されているかチェック
    /// - 不足があれば BuildError::MissingStages を返す
    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected_stages {
            let missing = self.registry.missing_stages(expected);
            if !missing.is_empty() {
                return Err(BuildError::MissingStages(missing));
            }
        }

        let registry = Arc::new(self.registry);
        let dispatcher = Arc::new(Dispatcher::new(self.store.clone(), registry.clone()));
        Ok(App {
            store: self.store,
            registry,
            dispatcher,
            config: self.config,
        })
    }
}

/// App は配線済みのアプリケーション
pub struct App {
    pub store: Arc<dyn TaskStore>,
    pub registry: Arc<AgentRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    config: SupervisorConfig,
}

impl App {
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ColorCorrectAgent, PublishAgent};
    use crate::impls::{ImageCrateEnhancer, InMemoryTaskStore};
    use crate::ports::SystemClock;

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(InMemoryTaskStore::new())
    }

    fn color(store: &Arc<dyn TaskStore>) -> Arc<dyn Agent> {
        Arc::new(ColorCorrectAgent::new(
            store.clone(),
            Arc::new(ImageCrateEnhancer::new()),
            Arc::new(SystemClock),
        ))
    }

    fn publish(store: &Arc<dyn TaskStore>) -> Arc<dyn Agent> {
        Arc::new(PublishAgent::new(store.clone(), None, Arc::new(SystemClock)))
    }

    #[test]
    fn test_build_success() {
        let store = store();
        let app = AppBuilder::new(store.clone())
            .register(color(&store))
            .unwrap()
            .register(publish(&store))
            .unwrap()
            .expect_stages(&Stage::all())
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_stages() {
        let store = store();
        let app = AppBuilder::new(store.clone())
            .register(color(&store))
            .unwrap()
            .expect_stages(&Stage::all())
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingStages(missing)) if missing == vec![Stage::Publish]
        ));
    }

    #[test]
    fn test_build_no_expect_stages() {
        let store = store();
        let app = AppBuilder::new(store.clone())
            .register(publish(&store))
            .unwrap()
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_register_duplicate_stage() {
        let store = store();
        let result = AppBuilder::new(store.clone())
            .register(publish(&store))
            .unwrap()
            .register(publish(&store));
        assert!(result.is_err());
    }
}
