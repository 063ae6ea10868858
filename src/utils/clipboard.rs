use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// Where `copy_link` puts the shareable link.
pub trait Clipboard: Send + Sync {
    /// Returns whether the text was written.
    fn copy(&self, text: &str) -> bool;
}

/// The operating system clipboard, through its command-line helper.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> bool {
        copy_to_clipboard(text)
    }
}

/// Keeps copied text in memory; can be told to refuse writes.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
    refuse: bool,
}

impl MemoryClipboard {
    pub fn refusing() -> Self {
        Self {
            contents: Mutex::new(None),
            refuse: true,
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().ok()?.clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn copy(&self, text: &str) -> bool {
        if self.refuse {
            return false;
        }
        match self.contents.lock() {
            Ok(mut contents) => {
                *contents = Some(text.to_string());
                true
            }
            Err(_) => false,
        }
    }
}

/// Copy text to the system clipboard. Cross-platform.
pub fn copy_to_clipboard(text: &str) -> bool {
    #[cfg(windows)]
    let result = {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        Command::new("clip")
            .creation_flags(CREATE_NO_WINDOW)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .and_then(|child| feed(child, text))
    };

    #[cfg(target_os = "macos")]
    let result = Command::new("pbcopy")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .and_then(|child| feed(child, text));

    #[cfg(all(not(windows), not(target_os = "macos")))]
    let result = Command::new("xclip")
        .args(["-selection", "clipboard"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .and_then(|child| feed(child, text));

    matches!(result, Ok(status) if status.success())
}

fn feed(mut child: std::process::Child, text: &str) -> std::io::Result<std::process::ExitStatus> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }
    child.wait()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::default();
        assert!(clipboard.copy("link"));
        assert_eq!(clipboard.contents().as_deref(), Some("link"));

        let refusing = MemoryClipboard::refusing();
        assert!(!refusing.copy("link"));
        assert_eq!(refusing.contents(), None);
    }
}
