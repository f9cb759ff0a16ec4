// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

mod graph;
pub mod hot;
mod node;
pub mod source;
pub mod specifier;
pub mod timestamp;
mod unified;

pub use graph::EnvironmentModuleGraph;
pub use graph::ImportedModule;
pub use graph::InvalidateOptions;
pub use graph::ModuleGraphError;
pub use graph::ModuleInfoChanges;
pub use graph::ModuleInfoUpdate;
pub use graph::ResolvedUrl;
pub use node::GraphId;
pub use node::InvalidationState;
pub use node::ModuleNode;
pub use node::ModuleRef;
pub use node::ModuleStatus;
pub use node::ModuleType;
pub use node::TransformResult;
pub use source::MemoryResolver;
pub use source::ModuleMeta;
pub use source::ModuleResolver;
pub use source::ResolveError;
pub use source::ResolvedId;
pub use unified::CombinedModuleNode;
pub use unified::CombinedModuleRef;
pub use unified::CombinedModuleSet;
pub use unified::ModuleHandle;
pub use unified::UnifiedModuleGraph;
pub use unified::BROWSER_ENVIRONMENT;
pub use unified::SERVER_ENVIRONMENT;
