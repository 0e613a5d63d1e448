//! Host mount table, used to reconcile persisted mount flags at startup.

use std::path::{Path, PathBuf};

/// Mount table of the plugin's own mount namespace.
pub const PROC_SELF_MOUNTS: &str = "/proc/self/mounts";

/// A single mount table line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted device or export, e.g. `nfs1:router1:v1`.
    pub source: String,
    /// Mount point, with octal escapes decoded.
    pub target: PathBuf,
    /// Filesystem type.
    pub fstype: String,
}

/// Currently mounted targets.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Parses `/proc/mounts` formatted text. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut table = MountTable::default();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let (Some(source), Some(target), Some(fstype)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let entry = MountEntry {
                source: unescape(source),
                target: PathBuf::from(unescape(target)),
                fstype: fstype.to_string(),
            };
            table.entries.push(entry);
        }
        table
    }

    /// Reads the mount table at `path`. A missing file yields an empty table.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no mount table, assuming nothing is mounted");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Most recent mount on `target`. Later lines stack over earlier ones.
    pub fn find(&self, target: &Path) -> Option<&MountEntry> {
        self.entries.iter().rev().find(|e| e.target == target)
    }

    /// True when anything is mounted on `target`.
    pub fn is_mounted(&self, target: &Path) -> bool {
        self.find(target).is_some()
    }

    /// Number of parsed lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no line was parsed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Decodes the kernel's octal escapes (`\040` for space, `\011` tab, ...).
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(b) = u8::try_from(value) {
                    out.push(b);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
