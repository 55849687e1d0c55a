// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod diff;
pub mod globmatch;
pub mod patch;
pub mod registry;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{
    decode_args, ActiveProcesses, CancelToken, CommandChunk, SideEffects, Tool, ToolCall,
    ToolContext, ToolOutput,
};

pub use builtin::apply_patch::ApplyPatchTool;
pub use builtin::delete_file::DeleteFileTool;
pub use builtin::edit_file::EditFileTool;
pub use builtin::glob_file_search::GlobFileSearchTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::read_lints::ReadLintsTool;
pub use builtin::rg::RgTool;
pub use builtin::run_terminal_cmd::RunTerminalCmdTool;
pub use builtin::todo_write::TodoWriteTool;
pub use builtin::update_memory::UpdateMemoryTool;

/// Register every built-in tool with its defaults.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(TodoWriteTool::default());
    registry.register(RunTerminalCmdTool::default());
    registry.register(ReadFileTool);
    registry.register(ApplyPatchTool);
    registry.register(EditFileTool);
    registry.register(RgTool);
    registry.register(DeleteFileTool);
    registry.register(UpdateMemoryTool::default());
    registry.register(ListDirTool);
    registry.register(GlobFileSearchTool);
    registry.register(ReadLintsTool);
}
