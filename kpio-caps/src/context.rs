//! Execution contexts
//!
//! The host script engine describes the running call stack with an
//! [`ExecutionContext`]. The subject principal of a check is the principal
//! of the innermost scripted frame; a context without scripted frames
//! belongs to native code.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::capability::UNIVERSAL_CAPABILITY;
use crate::principal::Principal;

/// One frame of the running call stack.
#[derive(Debug, Clone)]
pub struct StackFrame {
    principal: Option<Principal>,
    enabled: Vec<String>,
}

impl StackFrame {
    /// Frame of a script running as `principal`.
    pub fn script(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            enabled: Vec::new(),
        }
    }

    /// Frame of native code.
    pub fn native() -> Self {
        Self {
            principal: None,
            enabled: Vec::new(),
        }
    }

    /// Principal of the frame, `None` for native frames.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Capabilities enabled on this frame.
    pub fn enabled(&self) -> &[String] {
        &self.enabled
    }

    /// Whether `capability` (or the universal capability) was enabled on
    /// this frame.
    pub fn has_enabled(&self, capability: &str) -> bool {
        self.enabled
            .iter()
            .any(|c| c == capability || c == UNIVERSAL_CAPABILITY)
    }

    fn annotate(&mut self, capability: &str) {
        if !self.enabled.iter().any(|c| c == capability) {
            self.enabled.push(capability.to_string());
        }
    }
}

/// Call stack and script settings of one script context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    frames: Vec<StackFrame>,
    scripts_enabled: bool,
    universal_override: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Context with an empty stack and scripting enabled.
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            scripts_enabled: true,
            universal_override: false,
        }
    }

    /// Context running one script frame.
    pub fn for_principal(principal: Principal) -> Self {
        let mut ctx = Self::new();
        ctx.push_frame(StackFrame::script(principal));
        ctx
    }

    /// Push a frame.
    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Pop the innermost frame.
    pub fn pop_frame(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    /// Frames, outermost first.
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Whether scripting is enabled for this context.
    pub fn scripts_enabled(&self) -> bool {
        self.scripts_enabled
    }

    /// Enable or disable scripting for this context.
    pub fn set_scripts_enabled(&mut self, enabled: bool) {
        self.scripts_enabled = enabled;
    }

    /// Whether the host granted this context the universal override.
    pub fn universal_override(&self) -> bool {
        self.universal_override
    }

    /// Set the universal override.
    pub fn set_universal_override(&mut self, enabled: bool) {
        self.universal_override = enabled;
    }

    /// Innermost scripted frame.
    pub fn subject_frame(&self) -> Option<&StackFrame> {
        self.frames.iter().rev().find(|f| f.principal.is_some())
    }

    /// Principal of the running script, `None` for native callers.
    pub fn subject_principal(&self) -> Option<Principal> {
        self.subject_frame().and_then(|f| f.principal.clone())
    }

    /// Record `capability` as enabled on the subject frame. Returns false
    /// when no script is running.
    pub(crate) fn annotate_subject_frame(&mut self, capability: &str) -> bool {
        match self.frames.iter_mut().rev().find(|f| f.principal.is_some()) {
            Some(frame) => {
                frame.annotate(capability);
                true
            }
            None => false,
        }
    }
}
