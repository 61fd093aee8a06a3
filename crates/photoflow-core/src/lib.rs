//! photoflow-core
//!
//! Event-driven orchestration for the product-photo pipeline
//! (upload -> color correction -> publish).
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Task, TaskStatus, 結果レコード, 変更イベント, エラー分類）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator, ImageEnhancer, VisionClient, MediaPublisher）
//! - **impls**: ports の実装（InMemory / SQLite ストア, image クレート, OpenAI, WordPress）
//! - **agents**: パイプラインの各ステージ（色補正, 公開）
//! - **app**: 配線と実行（AppBuilder, Dispatcher, Supervisor, upload_photo, Config）

pub mod agents;
pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
