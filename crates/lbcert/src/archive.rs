//! Certbot archive bundle resolution
//!
//! Certbot keeps every issued version of a certificate under `archive/` and
//! points `live/` symlinks at the current one:
//!
//! ```text
//! etc/letsencrypt/
//! ├── archive/
//! │   └── example.com/
//! │       ├── fullchain1.pem
//! │       ├── fullchain2.pem
//! │       ├── privkey1.pem
//! │       └── privkey2.pem
//! └── live/
//!     └── example.com/
//!         ├── fullchain.pem -> ../../archive/example.com/fullchain2.pem
//!         └── privkey.pem   -> ../../archive/example.com/privkey2.pem
//! ```
//!
//! A tar stream cannot seek backwards and links may appear before or after
//! their targets, so the bundle is read in one forward pass that fills two
//! maps (archive content by file name, live link by file name). The maps are
//! joined once the stream is exhausted.

use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use tracing::{debug, info, trace};

use crate::error::{RotationError, RotationResult};

/// Only entries with this suffix carry certificate material
pub const PEM_SUFFIX: &str = ".pem";

/// Logical name of the certificate chain
pub const FULLCHAIN: &str = "fullchain";

/// Logical name of the private key
pub const PRIVKEY: &str = "privkey";

const ARCHIVE_SECTION: &str = "archive";
const LIVE_SECTION: &str = "live";

// ============================================================================
// Archive Entries
// ============================================================================

/// Kind of a tar entry as far as resolution is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Link,
    Other,
}

/// A single `.pem` record read from the bundle
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Present only for links
    pub link_target: Option<String>,
    /// Present only for regular files
    pub content: Option<String>,
}

/// Where a live file gets its content from
#[derive(Debug)]
enum LiveSource {
    /// Final path segment of the link target
    Link(String),
    /// Bundles created with dereferenced links carry the bytes directly
    Inline(String),
}

/// Split `.../{section}/{domain}/{file}` into its last three segments
fn classify(path: &str) -> Option<(&str, &str, &str)> {
    let mut segments = path.rsplit('/');
    let file = segments.next()?;
    let domain = segments.next()?;
    let section = segments.next()?;

    if file.is_empty() || domain.is_empty() {
        return None;
    }

    match section {
        ARCHIVE_SECTION | LIVE_SECTION => Some((section, domain, file)),
        _ => None,
    }
}

/// Final segment of a slash separated path
fn final_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Logical name of a live file: `fullchain.pem` becomes `fullchain`
fn logical_name(file: &str) -> &str {
    file.strip_suffix(PEM_SUFFIX).unwrap_or(file)
}

fn format_error(context: &str, err: impl std::fmt::Display) -> RotationError {
    RotationError::ArchiveFormat(format!("{}: {}", context, err))
}

fn read_entry<R: Read>(entry: &mut tar::Entry<'_, R>) -> RotationResult<Option<ArchiveEntry>> {
    let path = entry
        .path()
        .map_err(|e| format_error("unreadable entry path", e))?
        .to_string_lossy()
        .into_owned();

    if !path.ends_with(PEM_SUFFIX) {
        trace!(path = %path, "Skipping non-PEM entry");
        return Ok(None);
    }

    let kind = match entry.header().entry_type() {
        tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::Regular,
        tar::EntryType::Symlink | tar::EntryType::Link => EntryKind::Link,
        _ => EntryKind::Other,
    };

    let link_target = match kind {
        EntryKind::Link => entry
            .link_name()
            .map_err(|e| format_error("unreadable link target", e))?
            .map(|target| target.to_string_lossy().into_owned()),
        _ => None,
    };

    let content = match kind {
        EntryKind::Regular => {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| format_error(&format!("failed reading {}", path), e))?;
            let text = String::from_utf8(buf)
                .map_err(|e| format_error(&format!("{} is not UTF-8 text", path), e))?;
            Some(text)
        }
        _ => None,
    };

    Ok(Some(ArchiveEntry {
        path,
        kind,
        link_target,
        content,
    }))
}

// ============================================================================
// Certificate Bundle
// ============================================================================

/// Resolved live material of every domain in a bundle.
///
/// Every value is real PEM text taken from the `archive/` version its
/// `live/` link points at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertBundle {
    domains: BTreeMap<String, BTreeMap<String, String>>,
}

/// The certificate chain and private key of one domain
#[derive(Clone, PartialEq)]
pub struct LivePair {
    pub fullchain: String,
    pub privkey: String,
}

impl std::fmt::Debug for LivePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePair")
            .field("fullchain_len", &self.fullchain.len())
            .field("privkey", &"<redacted>")
            .finish()
    }
}

impl CertBundle {
    /// Parse a gzip compressed tar bundle and resolve every live link.
    ///
    /// # Errors
    ///
    /// - [`RotationError::ArchiveFormat`] if the gzip stream or tar container is corrupt
    /// - [`RotationError::UnresolvedLink`] if a live link has no matching archive content
    pub fn from_archive(bytes: &[u8]) -> RotationResult<Self> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));

        let mut contents: HashMap<(String, String), String> = HashMap::new();
        let mut live: BTreeMap<(String, String), LiveSource> = BTreeMap::new();

        info!(archive_bytes = bytes.len(), "Processing certificate archive");

        let entries = archive
            .entries()
            .map_err(|e| format_error("failed reading tar", e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| format_error("failed reading tar", e))?;
            let Some(record) = read_entry(&mut entry)? else {
                continue;
            };
            let Some((section, domain, file)) = classify(&record.path) else {
                trace!(path = %record.path, "Ignoring PEM outside archive/ and live/");
                continue;
            };

            debug!(section, domain, file, kind = ?record.kind, "Found PEM entry");
            let key = (domain.to_string(), file.to_string());

            match (section, record.kind) {
                (ARCHIVE_SECTION, EntryKind::Regular) => {
                    contents.insert(key, record.content.unwrap_or_default());
                }
                (LIVE_SECTION, EntryKind::Link) => {
                    let target = record.link_target.ok_or_else(|| {
                        RotationError::ArchiveFormat(format!(
                            "link {} has no target",
                            record.path
                        ))
                    })?;
                    live.insert(key, LiveSource::Link(final_segment(&target).to_string()));
                }
                (LIVE_SECTION, EntryKind::Regular) => {
                    live.insert(key, LiveSource::Inline(record.content.unwrap_or_default()));
                }
                _ => {
                    trace!(path = %record.path, "Ignoring entry of unexpected kind");
                }
            }
        }

        // The tar reader stops at the end-of-archive marker; reading the rest
        // of the stream makes the decoder verify the gzip trailer.
        std::io::copy(&mut archive.into_inner(), &mut std::io::sink())
            .map_err(|e| format_error("corrupt gzip stream", e))?;

        let mut domains: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        for ((domain, file), source) in live {
            let content = match source {
                LiveSource::Link(target) => contents
                    .get(&(domain.clone(), target.clone()))
                    .filter(|content| !content.trim().is_empty())
                    .cloned()
                    .ok_or_else(|| RotationError::UnresolvedLink {
                        domain: domain.clone(),
                        file: file.clone(),
                        target,
                    })?,
                LiveSource::Inline(content) if !content.trim().is_empty() => content,
                LiveSource::Inline(_) => {
                    return Err(RotationError::UnresolvedLink {
                        target: file.clone(),
                        domain,
                        file,
                    });
                }
            };

            trace!(domain = %domain, file = %file, "Resolved live entry");
            domains
                .entry(domain)
                .or_default()
                .insert(logical_name(&file).to_string(), content);
        }

        debug!(
            domains = domains.len(),
            archive_files = contents.len(),
            "Resolved certificate archive"
        );

        Ok(Self { domains })
    }

    /// Domains with at least one live file
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    /// Resolved content of a logical file (`fullchain`, `privkey`, ...)
    pub fn get(&self, domain: &str, name: &str) -> Option<&str> {
        self.domains
            .get(domain)
            .and_then(|files| files.get(name))
            .map(String::as_str)
    }

    /// Certificate chain and private key of `domain`.
    ///
    /// Fails with [`RotationError::MissingMaterial`] when either is absent.
    pub fn live_pair(&self, domain: &str) -> RotationResult<LivePair> {
        let require = |name: &str| {
            self.get(domain, name)
                .map(str::to_string)
                .ok_or_else(|| RotationError::MissingMaterial {
                    domain: domain.to_string(),
                    file: format!("{}{}", name, PEM_SUFFIX),
                })
        };

        Ok(LivePair {
            fullchain: require(FULLCHAIN)?,
            privkey: require(PRIVKEY)?,
        })
    }
}

/// Resolve the live certificate chain and private key of `domain` in a bundle
pub fn resolve(bytes: &[u8], domain: &str) -> RotationResult<LivePair> {
    CertBundle::from_archive(bytes)?.live_pair(domain)
}
