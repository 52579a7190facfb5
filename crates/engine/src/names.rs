//! Static command-name table.
//!
//! Planners emit dotted names (`mouse.click`), scripts use canonical upper
//! snake case (`MOUSE_CLICK`). Both resolve through one table to a
//! [`CommandSpec`] naming the canonical command and the handler category.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Serialize;

/// Which handler family executes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Mouse,
    Keyboard,
    Application,
    System,
    Window,
    Wait,
    Script,
    Loop,
    Control,
}

/// A resolved command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub category: Category,
}

const CANONICAL: &[(&str, Category)] = &[
    ("MOUSE_MOVE", Category::Mouse),
    ("MOUSE_CLICK", Category::Mouse),
    ("MOUSE_DOUBLE_CLICK", Category::Mouse),
    ("MOUSE_RIGHT_CLICK", Category::Mouse),
    ("TYPE_TEXT", Category::Keyboard),
    ("KEY_COMBO", Category::Keyboard),
    ("KEY_PRESS", Category::Keyboard),
    ("APP_LAUNCH", Category::Application),
    ("APP_CLOSE", Category::Application),
    ("SYSTEM_RUN_COMMAND", Category::System),
    ("SYSTEM_CLIPBOARD_GET", Category::System),
    ("SYSTEM_CLIPBOARD_SET", Category::System),
    ("SYSTEM_FILE_FIND", Category::System),
    ("SYSTEM_FILE_MOVE", Category::System),
    ("SYSTEM_DELETE_FILE", Category::System),
    ("SYSTEM_CREATE_DIR", Category::System),
    ("SYSTEM_FILE_INFO", Category::System),
    ("SYSTEM_FORMAT_DRIVE", Category::System),
    ("SYSTEM_MODIFY_REGISTRY", Category::System),
    ("SYSTEM_SHUTDOWN", Category::System),
    ("SYSTEM_RESTART", Category::System),
    ("WINDOW_FIND", Category::Window),
    ("WINDOW_FOCUS", Category::Window),
    ("WINDOW_RESIZE", Category::Window),
    ("WINDOW_MOVE", Category::Window),
    ("WINDOW_ENUMERATE", Category::Window),
    ("WINDOW_CLOSE", Category::Window),
    ("WINDOW_CLOSE_ALL", Category::Window),
    ("WAIT", Category::Wait),
    ("EXECUTE_SCRIPT", Category::Script),
    ("WHILE_LOOP", Category::Loop),
    ("SET_VARIABLE", Category::Control),
    ("GET_VARIABLE", Category::Control),
    ("IF_CONTAINS", Category::Control),
    ("IF_NOT_CONTAINS", Category::Control),
    ("IF_EQUALS", Category::Control),
    ("IF_NOT_EQUALS", Category::Control),
    ("CONDITIONAL_STOP", Category::Control),
    ("BREAK_IF", Category::Control),
    ("CONTINUE_IF", Category::Control),
];

/// Planner-facing names, matched lower-cased.
const ALIASES: &[(&str, &str)] = &[
    ("mouse.move", "MOUSE_MOVE"),
    ("mouse.click", "MOUSE_CLICK"),
    ("mouse.doubleclick", "MOUSE_DOUBLE_CLICK"),
    ("mouse.double_click", "MOUSE_DOUBLE_CLICK"),
    ("mouse.rightclick", "MOUSE_RIGHT_CLICK"),
    ("mouse.right_click", "MOUSE_RIGHT_CLICK"),
    ("keyboard.type", "TYPE_TEXT"),
    ("keyboard.sendkeys", "TYPE_TEXT"),
    ("keyboard.hotkey", "KEY_COMBO"),
    ("keyboard.combo", "KEY_COMBO"),
    ("keyboard.press", "KEY_PRESS"),
    ("keyboard.key", "KEY_PRESS"),
    ("application.launch", "APP_LAUNCH"),
    ("app.launch", "APP_LAUNCH"),
    ("process.launch", "APP_LAUNCH"),
    ("application.close", "APP_CLOSE"),
    ("app.close", "APP_CLOSE"),
    ("process.terminate", "APP_CLOSE"),
    ("shell.execute", "SYSTEM_RUN_COMMAND"),
    ("system.shell", "SYSTEM_RUN_COMMAND"),
    ("system.run", "SYSTEM_RUN_COMMAND"),
    ("clipboard.get", "SYSTEM_CLIPBOARD_GET"),
    ("clipboard.set", "SYSTEM_CLIPBOARD_SET"),
    ("file.find", "SYSTEM_FILE_FIND"),
    ("file.move", "SYSTEM_FILE_MOVE"),
    ("file.delete", "SYSTEM_DELETE_FILE"),
    ("file.createdir", "SYSTEM_CREATE_DIR"),
    ("file.create_dir", "SYSTEM_CREATE_DIR"),
    ("file.getinfo", "SYSTEM_FILE_INFO"),
    ("file.info", "SYSTEM_FILE_INFO"),
    ("system.format", "SYSTEM_FORMAT_DRIVE"),
    ("system.registry", "SYSTEM_MODIFY_REGISTRY"),
    ("system.shutdown", "SYSTEM_SHUTDOWN"),
    ("system.restart", "SYSTEM_RESTART"),
    ("window.find", "WINDOW_FIND"),
    ("window.focus", "WINDOW_FOCUS"),
    ("window.resize", "WINDOW_RESIZE"),
    ("window.move", "WINDOW_MOVE"),
    ("window.enumerate", "WINDOW_ENUMERATE"),
    ("window.list", "WINDOW_ENUMERATE"),
    ("window.close", "WINDOW_CLOSE"),
    ("window.closeall", "WINDOW_CLOSE_ALL"),
    ("window.close_all", "WINDOW_CLOSE_ALL"),
    ("delay", "WAIT"),
    ("wait", "WAIT"),
    ("system.wait", "WAIT"),
    ("script.execute", "EXECUTE_SCRIPT"),
    ("script.run", "EXECUTE_SCRIPT"),
    ("control.while", "WHILE_LOOP"),
    ("loop.while", "WHILE_LOOP"),
    ("variable.set", "SET_VARIABLE"),
    ("variable.get", "GET_VARIABLE"),
    ("control.if_contains", "IF_CONTAINS"),
    ("control.if_not_contains", "IF_NOT_CONTAINS"),
    ("control.if_equals", "IF_EQUALS"),
    ("control.if_not_equals", "IF_NOT_EQUALS"),
    ("control.stop", "CONDITIONAL_STOP"),
    ("control.break_if", "BREAK_IF"),
    ("control.continue_if", "CONTINUE_IF"),
];

static TABLE: LazyLock<HashMap<String, CommandSpec>> = LazyLock::new(|| {
    let by_name: HashMap<&str, Category> = CANONICAL.iter().copied().collect();
    let mut table = HashMap::with_capacity(CANONICAL.len() + ALIASES.len());

    for &(name, category) in CANONICAL {
        table.insert(name.to_ascii_lowercase(), CommandSpec { name, category });
    }
    for &(alias, name) in ALIASES {
        if let Some(&category) = by_name.get(name) {
            table.insert(alias.to_string(), CommandSpec { name, category });
        }
    }
    table
});

/// Resolve an action name. Case-insensitive for both forms.
pub fn resolve(action: &str) -> Option<CommandSpec> {
    TABLE.get(&action.trim().to_ascii_lowercase()).copied()
}

/// Canonical name, or the input unchanged if unknown.
pub fn canonical_name(action: &str) -> String {
    resolve(action)
        .map(|spec| spec.name.to_string())
        .unwrap_or_else(|| action.to_string())
}

/// All canonical names, in table order.
pub fn canonical_names() -> impl Iterator<Item = &'static str> {
    CANONICAL.iter().map(|(name, _)| *name)
}
