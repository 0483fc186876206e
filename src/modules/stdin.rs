//! `stdin.*` (§6): `on`, `prompt` (alias for `setPrompt`), `pause`, `resume`,
//! `setRawMode`, `close` — a thin pass-through to the process-wide [`StdinReader`]
//! instance carried by [`Modules`].

use crate::evaluator::CallbackHandle;

use super::Modules;

pub fn on(modules: &Modules, event: &str, callback: CallbackHandle) {
    modules.stdin.on(event, callback);
}

pub fn set_prompt(modules: &Modules, prompt: Option<String>) {
    modules.stdin.set_prompt(prompt);
}

pub fn pause(modules: &Modules) {
    modules.stdin.pause();
}

pub fn resume(modules: &Modules) {
    modules.stdin.resume();
}

pub fn set_raw_mode(modules: &Modules, enable: bool) -> std::io::Result<()> {
    modules.stdin.set_raw_mode(enable)
}

pub fn close(modules: &Modules) {
    modules.stdin.close();
}
