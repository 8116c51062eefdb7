// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod router;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use router::{Dispatch, RouteError, ToolRouter, UnreachableForwarder, WorkspaceForwarder};
pub use tool::{Tool, ToolCall, ToolResult};

pub use builtin::delegate::DelegateTaskTool;
pub use builtin::fs::{ListDirTool, ReadFileTool, WriteFileTool};
pub use builtin::memory::{SaveMemoryTool, SearchMemoryTool};
pub use builtin::web_search::WebSearchTool;
