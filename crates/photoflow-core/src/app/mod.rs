//! App - アプリケーション層
//!
//! ports と agents を組み合わせて、イベント駆動のパイプラインを動かします。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 依存の注入と起動時検証
//! - **ChangeListener**: 変更フィードの購読
//! - **Dispatcher**: イベント → タスク再読込 → ステータスでエージェントを選択
//! - **Supervisor**: 再接続バックオフ、失敗時の再試行スケジュール、シャットダウン
//! - **upload_photo**: パイプラインの入口
//! - **Config** / **init_tracing**: 環境変数とログ

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod listener;
pub mod observability;
pub mod retry;
pub mod supervisor;
pub mod upload;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::config::{Config, ConfigError, VisionConfig};
pub use self::dispatcher::{DispatchOutcome, Dispatcher};
pub use self::listener::ChangeListener;
pub use self::observability::init_tracing;
pub use self::retry::{ReconnectBackoff, RetryPolicy};
pub use self::supervisor::{ShutdownTrigger, Supervisor, SupervisorConfig, WorkerHandle};
pub use self::upload::{UploadError, UploadReceipt, UploadRequest, upload_photo};
