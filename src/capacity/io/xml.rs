use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;
use xml::attribute::OwnedAttribute;

use crate::capacity::io::create_writer;

pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(thiserror::Error, Debug)]
pub enum XmlWriteError {
    #[error("failed to serialize xml: {0}")]
    Serialize(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serializes `message` as an indented xml document. The output only depends on `message`, so
/// writing the same value twice yields identical bytes.
pub fn to_string<T: Serialize>(message: &T) -> Result<String, XmlWriteError> {
    let mut body = String::new();
    let mut serializer = quick_xml::se::Serializer::new(&mut body);
    serializer.indent(' ', 4);
    message
        .serialize(serializer)
        .map_err(|e| XmlWriteError::Serialize(e.to_string()))?;

    let mut result = String::with_capacity(XML_HEADER.len() + body.len() + 1);
    result.push_str(XML_HEADER);
    result.push_str(&body);
    result.push('\n');
    Ok(result)
}

/// Writes `message` to `path`, replacing whatever was there.
pub fn write_to_file<T: Serialize>(message: &T, path: &Path) -> Result<(), XmlWriteError> {
    let text = to_string(message)?;
    let mut writer = create_writer(path)?;
    writer.write_all(text.as_bytes())?;
    writer.flush()?;
    debug!("Finished writing file to: {path:?}");
    Ok(())
}

/// Looks up an attribute of a streamed start element by its local name.
pub fn attribute<'a>(attributes: &'a [OwnedAttribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name.local_name == name)
        .map(|a| a.value.as_str())
}

/// Parses an attribute value, returning the raw text on failure so callers can report it.
pub fn parse_attribute<T: FromStr>(
    attributes: &[OwnedAttribute],
    name: &str,
) -> Option<Result<T, String>> {
    attribute(attributes, name).map(|raw| raw.trim().parse::<T>().map_err(|_| raw.to_string()))
}
