//! XML loader
//!
//! Each child of the root element is a row. The row's attributes and the
//! text of its direct child elements are columns; deeper nesting is ignored.

use super::{decode_text, LoadContext, Loader};
use crate::error::FileError;
use crate::frame::Frame;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlLoader;

impl Loader for XmlLoader {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xml", "rdf"]
    }

    fn media_type_pattern(&self) -> Option<&'static str> {
        Some(r"^(application|text)/([\w.+-]+\+)?xml\b")
    }

    fn load(&self, data: &[u8], ctx: &LoadContext<'_>) -> Result<Frame, FileError> {
        let text = decode_text(data);
        let mut table = Table::default();
        let mut reader = Reader::from_str(&text);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut row: Option<Vec<(String, Option<String>)>> = None;
        let mut field: Option<String> = None;

        loop {
            match reader.read_event().map_err(|e| xml_error(&reader, e))? {
                Event::Start(element) => {
                    depth += 1;
                    match depth {
                        2 => row = Some(attributes(&element)?),
                        3 => {
                            let name = local_name(&element);
                            if let Some(ref mut row) = row {
                                row.push((name.clone(), None));
                            }
                            field = Some(name);
                        }
                        _ => {}
                    }
                }
                Event::Empty(element) => match depth {
                    1 => table.push(attributes(&element)?),
                    2 => {
                        if let Some(ref mut row) = row {
                            row.push((local_name(&element), None));
                        }
                    }
                    _ => {}
                },
                Event::Text(content) if depth == 3 && field.is_some() => {
                    let value = content
                        .unescape()
                        .map_err(|e| FileError::load(e.to_string()))?
                        .into_owned();
                    set_last(&mut row, value);
                }
                Event::CData(content) if depth == 3 && field.is_some() => {
                    let value = String::from_utf8_lossy(&content.into_inner()).into_owned();
                    set_last(&mut row, value);
                }
                Event::End(_) => {
                    match depth {
                        2 => {
                            if let Some(done) = row.take() {
                                table.push(done);
                            }
                        }
                        3 => field = None,
                        _ => {}
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if table.rows.is_empty() {
            return Err(FileError::load("no records found in XML document"));
        }
        let frame = Frame::from_utf8_rows(&table.columns, &table.rows)?;
        ctx.options.apply(frame)
    }
}

/// Rows aligned on the first-seen column order
#[derive(Default)]
struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    fn push(&mut self, cells: Vec<(String, Option<String>)>) {
        let mut row = vec![None; self.columns.len()];
        for (name, value) in cells {
            let idx = match self.index.get(&name) {
                Some(idx) => *idx,
                None => {
                    self.index.insert(name.clone(), self.columns.len());
                    self.columns.push(name);
                    self.columns.len() - 1
                }
            };
            if row.len() <= idx {
                row.resize(idx + 1, None);
            }
            if value.is_some() {
                row[idx] = value;
            }
        }
        self.rows.push(row);
    }
}

fn set_last(row: &mut Option<Vec<(String, Option<String>)>>, value: String) {
    if let Some(slot) = row.as_mut().and_then(|cells| cells.last_mut()) {
        match slot.1 {
            Some(ref mut existing) => existing.push_str(&value),
            None => slot.1 = Some(value),
        }
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attributes(element: &BytesStart<'_>) -> Result<Vec<(String, Option<String>)>, FileError> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| FileError::load(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| FileError::load(e.to_string()))?
                .into_owned();
            Ok((key, Some(value)))
        })
        .collect()
}

fn xml_error(reader: &Reader<&[u8]>, err: quick_xml::Error) -> FileError {
    FileError::load(format!("invalid XML at byte {}: {}", reader.buffer_position(), err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loaders::{LoadOptions, LoaderRegistry};

    fn load(data: &str) -> Result<Frame, FileError> {
        LoaderRegistry::with_defaults().decode("xml", data.as_bytes(), &LoadOptions::default(), None)
    }

    #[test]
    fn test_rows_from_children_of_root() {
        let frame = load(
            r#"<?xml version="1.0"?>
            <marches>
              <marche id="m1"><objet>Voirie &amp; réseaux</objet><montant>1200</montant></marche>
              <marche id="m2"><objet><![CDATA[Cantine <scolaire>]]></objet><titulaire/></marche>
            </marches>"#,
        )
        .unwrap();

        assert_eq!(frame.column_names(), vec!["id", "objet", "montant", "titulaire"]);
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(
            frame.utf8_values("objet").unwrap().unwrap(),
            vec![Some("Voirie & réseaux".to_string()), Some("Cantine <scolaire>".to_string())]
        );
        assert_eq!(frame.utf8_values("montant").unwrap().unwrap()[1], None);
    }

    #[test]
    fn test_empty_row_elements_keep_attributes() {
        let frame = load(r#"<root><row a="1" b="2"/><row a="3"/></root>"#).unwrap();
        assert_eq!(frame.column_names(), vec!["a", "b"]);
        assert_eq!(frame.utf8_values("b").unwrap().unwrap(), vec![Some("2".to_string()), None]);
    }

    #[test]
    fn test_malformed_and_empty_documents() {
        assert!(matches!(load("<root><row></root>"), Err(FileError::Load(_))));
        assert!(matches!(load("<root/>"), Err(FileError::Load(_))));
    }
}
