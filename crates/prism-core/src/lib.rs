//! prism-core
//!
//! Core building blocks of the Prism task engine: an asynchronous
//! orchestrator for multi-stage image-processing pipelines.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, record, group, outcome, status, errors）
//! - **broker**: キューの抽象化と開発用 in-memory 実装
//! - **handler**: 型付き Task API（Task trait, Handler trait, HandlerRegistry）
//! - **manager**: 提出・状態・グループ調整のアプリケーションロジック
//! - **worker / monitor**: 実行ループと admission timeout sweeper
//!
//! The manager owns every state decision; workers and the monitor report
//! into it. Queue routing is static per task name, with a dynamic GPU-pool
//! escape hatch for classification-driven pipelines.

pub mod broker;
pub mod config;
pub mod domain;
pub mod handler;
pub mod manager;
pub mod monitor;
pub mod notify;
pub mod registry;
pub mod retry;
pub mod router;
pub mod storage;
pub mod worker;

pub use broker::{Broker, InMemoryBroker, TaskMessage};
pub use config::PrismConfig;
pub use domain::{
    GroupMode, Outcome, PrismError, QueueName, RouteSpec, SubTaskSpec, TaskError, TaskId,
    TaskName, TaskState, TaskStatus,
};
pub use handler::{Handler, HandlerRegistry, Task, TaskContext};
pub use manager::TaskManager;
pub use monitor::{MonitorHandle, TimeoutMonitor};
pub use notify::{EmailNotifier, LogNotifier, Notifier, NotifyEvent, WebhookNotifier};
pub use registry::TaskRegistry;
pub use router::Router;
pub use storage::TaskStorage;
pub use worker::WorkerPool;
