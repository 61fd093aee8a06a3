//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発用・テスト用の正本（障害注入つき）
//! - **SqliteTaskStore**: 単一ノード向けの正本（task_changes テーブルをポーリング）
//! - **ImageCrateEnhancer**: ローカル画像の色補正
//! - **OpenAiVisionClient**: リモート画像の分析
//! - **WordPressClient**: メディアライブラリへのアップロード

pub mod image_enhancer;
pub mod inmem_store;
pub mod openai_vision;
pub mod sqlite_store;
pub mod wordpress;

// 主要な型を再エクスポート
pub use self::image_enhancer::ImageCrateEnhancer;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::openai_vision::OpenAiVisionClient;
pub use self::sqlite_store::SqliteTaskStore;
pub use self::wordpress::{MOD_SECURITY_HINT, WordPressClient, WordPressCredentials};
