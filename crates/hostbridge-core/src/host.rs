//! Capabilities the hosting command engine provides to the session

/// Local console of the command engine
///
/// Prompts render here before they are forwarded to the editor client, so the
/// prompt text interleaves correctly with the engine's other output.
pub trait HostConsole: Send + Sync {
    /// Write text to the local console without a trailing newline
    fn write(&self, text: &str);

    /// Raise the engine's break signal so the in-flight command aborts
    fn interrupt(&self);
}
