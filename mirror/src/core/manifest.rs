//! Manifest parsing for decompiled artifacts.
//!
//! The decompiler emits a text XML manifest whose root element is `manifest`
//! and carries `versionCode` and `versionName`. Namespace prefixes
//! (`android:versionCode`) are ignored; only local names are matched.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::types::{Version, VersionCode};
use crate::error::SyncError;

const ROOT_ELEMENT: &[u8] = b"manifest";
const VERSION_CODE_ATTR: &[u8] = b"versionCode";
const VERSION_NAME_ATTR: &[u8] = b"versionName";

/// Parse manifest XML into a [`Version`].
///
/// Fails with [`SyncError::MalformedManifest`] when the document has no
/// `manifest` root, either attribute is missing, or the code is not a
/// non-negative decimal integer.
pub fn parse_manifest(xml: &str) -> Result<Version, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                if element.local_name().as_ref() != ROOT_ELEMENT {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    return Err(SyncError::malformed(format!(
                        "root element is <{name}>, expected <manifest>"
                    )));
                }
                return version_from_root(&element);
            }
            Ok(Event::Eof) => {
                return Err(SyncError::malformed("document has no root element"));
            }
            Ok(_) => {}
            Err(err) => {
                return Err(SyncError::malformed(format!(
                    "xml error at byte {}: {err}",
                    reader.error_position()
                )));
            }
        }
    }
}

fn version_from_root(element: &BytesStart<'_>) -> Result<Version, SyncError> {
    let code_raw = required_attr(element, VERSION_CODE_ATTR)?;
    let name = required_attr(element, VERSION_NAME_ATTR)?;
    let code = parse_code(&code_raw)?;
    Ok(Version::new(code, &name))
}

fn required_attr(element: &BytesStart<'_>, local: &[u8]) -> Result<String, SyncError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| SyncError::malformed(format!("bad attribute: {err}")))?;
        if attr.key.local_name().as_ref() != local {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| SyncError::malformed(format!("bad attribute value: {err}")))?;
        return Ok(value.into_owned());
    }
    Err(SyncError::malformed(format!(
        "missing attribute {}",
        String::from_utf8_lossy(local)
    )))
}

fn parse_code(raw: &str) -> Result<VersionCode, SyncError> {
    let trimmed = raw.trim();
    trimmed.parse::<VersionCode>().map_err(|_| {
        SyncError::malformed(format!(
            "versionCode '{trimmed}' is not a non-negative integer"
        ))
    })
}
