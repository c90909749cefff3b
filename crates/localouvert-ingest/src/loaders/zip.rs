//! ZIP archive loader
//!
//! Picks one member and hands it to the loader registered for its extension.
//! With several loadable members, the one whose name starts with the
//! archive's own file stem is chosen (`budget_2023.zip` -> `budget_2023.csv`).

use super::{url_extension, LoadContext, Loader};
use crate::error::FileError;
use crate::frame::Frame;
use std::io::{Cursor, Read};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipLoader;

impl Loader for ZipLoader {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn media_type_pattern(&self) -> Option<&'static str> {
        Some("zip")
    }

    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError> {
        let mut archive =
            ::zip::ZipArchive::new(Cursor::new(data)).map_err(|e| FileError::load(e.to_string()))?;

        let candidates: Vec<(String, String)> = archive
            .file_names()
            .filter(|name| !name.ends_with('/') && !name.starts_with("__MACOSX/"))
            .filter_map(|name| {
                url_extension(name)
                    .filter(|ext| ctx.registry.supports(ext))
                    .map(|ext| (name.to_string(), ext))
            })
            .collect();

        let (member, extension) = pick_member(candidates, ctx.source)?;
        debug!(member = %member, "Loading archive member");

        let mut content = Vec::new();
        archive
            .by_name(&member)
            .map_err(|e| FileError::load(e.to_string()))?
            .read_to_end(&mut content)?;

        ctx.registry.decode(&extension, &content, ctx.options, Some(&member))
    }
}

fn pick_member(
    mut candidates: Vec<(String, String)>,
    source: Option<&str>,
) -> Result<(String, String), FileError> {
    match candidates.len() {
        0 => Err(FileError::load("no loadable file in archive")),
        1 => Ok(candidates.remove(0)),
        _ => {
            let prefix = source.and_then(archive_stem).unwrap_or_default();
            let mut matching: Vec<(String, String)> = candidates
                .into_iter()
                .filter(|(name, _)| {
                    !prefix.is_empty() && base_name(name).starts_with(prefix.as_str())
                })
                .collect();
            if matching.len() == 1 {
                Ok(matching.remove(0))
            } else {
                Err(FileError::load("too many files in archive"))
            }
        }
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn archive_stem(source: &str) -> Option<String> {
    let path = match url::Url::parse(source) {
        Ok(parsed) if parsed.scheme().len() > 1 => parsed.path().to_string(),
        _ => source.to_string(),
    };
    let name = path.rsplit(['/', '\\']).next()?;
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    (!stem.is_empty()).then(|| stem.to_string())
}
