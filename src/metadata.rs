use crate::outcome::Outcome;
use crate::paths::{PathResolver, METADATA_FILE_NAME};
use crate::{EngineError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::PathBuf;

const ALBUM_TYPE: &str = "Broadcast";

/// Writes `album.nfo` for a podcast so media servers treat the folder as an album.
pub fn write_collection_metadata(
    resolver: &PathResolver,
    title: &str,
    thumb_url: &str,
) -> Result<Outcome<PathBuf>> {
    let mut outcome = Outcome::clean(());
    let folder = outcome.absorb(resolver.data_folder(title)?);
    let path = folder.join(METADATA_FILE_NAME);

    let xml = render_nfo(title, thumb_url).map_err(|message| EngineError::Metadata {
        path: path.clone(),
        message,
    })?;
    std::fs::write(&path, xml).map_err(|e| EngineError::io(&path, e))?;
    tracing::debug!(path = %path.display(), "wrote collection metadata");

    resolver.ownership().normalize_into(&path, &mut outcome);
    Ok(outcome.map(|_| path))
}

fn render_nfo(title: &str, thumb_url: &str) -> std::result::Result<Vec<u8>, String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(fail)?;
    writer
        .write_event(Event::Start(BytesStart::new("album")))
        .map_err(fail)?;
    for (tag, text) in [("title", title), ("type", ALBUM_TYPE), ("thumb", thumb_url)] {
        write_text_element(&mut writer, tag, text)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("album")))
        .map_err(fail)?;

    let mut bytes = writer.into_inner().into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    text: &str,
) -> std::result::Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(fail)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(fail)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(fail)?;
    Ok(())
}

fn fail(e: impl std::fmt::Display) -> String {
    e.to_string()
}
