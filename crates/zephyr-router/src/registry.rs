//! Directory scanning.
//!
//! A route tree is a directory whose files follow the role conventions of
//! [`ProtocolType::from_file_stem`]. The URL pattern of a route is the
//! directory holding its file, relative to the scan root.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, warn};

use crate::descriptor::{ProtocolType, RouteDescriptor, Segment};

/// Recursively scans `root` for route files.
///
/// Within a directory, files come first, then literal subdirectories, then
/// bracketed ones, each group sorted by name. Static routes therefore
/// precede their dynamic siblings in the returned order.
///
/// An unreadable directory is logged and contributes no routes; the rest
/// of the tree is still scanned.
pub async fn scan(root: impl AsRef<Path>) -> Vec<RouteDescriptor> {
    let root = root.as_ref();
    let mut routes = Vec::new();
    scan_dir(root, String::new(), &mut routes).await;
    debug!(root = %root.display(), routes = routes.len(), "route scan complete");
    routes
}

/// Scans `root` and keeps only descriptors of one protocol.
pub async fn scan_protocol(root: impl AsRef<Path>, protocol: ProtocolType) -> Vec<RouteDescriptor> {
    let mut routes = scan(root).await;
    routes.retain(|d| d.protocol() == protocol);
    routes
}

struct DirEntry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

impl DirEntry {
    fn rank(&self) -> u8 {
        if !self.is_dir {
            0
        } else if Segment::parse(&self.name).is_dynamic() {
            2
        } else {
            1
        }
    }
}

fn scan_dir<'a>(
    dir: &'a Path,
    prefix: String,
    out: &'a mut Vec<RouteDescriptor>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let entries = match read_entries(dir).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(dir = %dir.display(), %error, "skipping unreadable route directory");
                return;
            }
        };

        for entry in entries {
            if entry.is_dir {
                let child = format!("{prefix}/{}", entry.name);
                scan_dir(&entry.path, child, out).await;
                continue;
            }

            let stem = Path::new(&entry.name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if let Some(protocol) = ProtocolType::from_file_stem(stem) {
                let descriptor = RouteDescriptor::new(protocol, entry.path, &prefix);
                debug!(route = %descriptor, "discovered route");
                out.push(descriptor);
            }
        }
    })
}

async fn read_entries(dir: &Path) -> io::Result<Vec<DirEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        // Follows symlinks, unlike DirEntry::file_type.
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable route entry");
                continue;
            }
        };
        entries.push(DirEntry {
            path,
            name,
            is_dir: metadata.is_dir(),
        });
    }

    entries.sort_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}
