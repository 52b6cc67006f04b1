//! ECS FIS Core - Fault injection support for ECS Fargate tasks
//!
//! AWS Fault Injection Service runs ECS task experiments through an SSM agent
//! living next to the workload. This crate prepares a Fargate task definition
//! for that: it checks and patches the task, mints or adopts the agent's role
//! and log group, grants the permissions involved, and adds the sidecar
//! container with its lifecycle script.
//!
//! # Architecture
//!
//! 1. **Precondition Resolver** (`resolver`): fault kinds to runtime preconditions
//! 2. **Configuration Validator** (`validator`): preconditions to a task patch, or a failure
//! 3. **Permission Composer** (`permissions`): grants for the task and agent roles
//! 4. **Lifecycle Script Assembler** (`script`): the sidecar's bash routine
//!
//! [`construct::FaultInjection`] ties them together; the resource model
//! (`task`, `iam`, `logs`, `stack`, `template`) renders CloudFormation.
//!
//! # Quick Start
//!
//! ```
//! use ecs_fis_core::construct::{synthesize, FaultInjection, FaultInjectionProps};
//! use ecs_fis_core::stack::Stack;
//! use ecs_fis_core::task::{ContainerDefinition, TaskDefinition};
//!
//! let stack = Stack::new("orders");
//! let mut task = TaskDefinition::fargate("OrdersTask", "orders");
//! task.add_container(ContainerDefinition::new("app", "nginx")).unwrap();
//!
//! let fis = FaultInjection::apply(&stack, "Fis", &mut task, FaultInjectionProps::new()).unwrap();
//! let template = synthesize(&stack, &task, &fis).unwrap();
//!
//! println!("{}", template.to_json_pretty().unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod action;
pub mod arn;
pub mod config;
pub mod construct;
pub mod error;
pub mod iam;
pub mod logs;
pub mod permissions;
pub mod resolver;
pub mod script;
pub mod stack;
pub mod task;
pub mod template;
pub mod validator;

pub use action::{FaultActionKind, FaultActionSet, PreconditionSet, RuntimePrecondition};
pub use config::FisConfig;
pub use construct::{synthesize, FaultInjection, FaultInjectionProps};
pub use error::{FisError, Result, ResultExt};
pub use resolver::resolve_preconditions;
pub use validator::{plan, TaskPatch, TaskRuntimeSnapshot, ValidationFailure};

/// Version of ECS FIS Core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
