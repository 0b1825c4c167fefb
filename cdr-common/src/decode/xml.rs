use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::record::RawRecord;

use super::DecodeError;

const RECORD_TAG: &[u8] = b"record";

/// Every `<record>` element, wherever it sits in the document, is one record. Its child elements
/// are the fields: the tag names the field and the text is its value.
pub(super) fn decode(content: &str) -> Result<Vec<RawRecord>, DecodeError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<RawRecord> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                let local = element.local_name();
                let name: &[u8] = local.as_ref();
                if current.is_none() {
                    if name == RECORD_TAG {
                        current = Some(RawRecord::default());
                    }
                } else if field.is_none() {
                    field = Some(String::from_utf8_lossy(name).into_owned());
                }
            }
            Event::Empty(element) => {
                let local = element.local_name();
                if current.is_none() && local.as_ref() == RECORD_TAG {
                    records.push(RawRecord::default());
                }
            }
            Event::Text(text) => {
                if let (Some(record), Some(name)) = (current.as_mut(), field.as_deref()) {
                    let value = text.unescape()?;
                    record.set_field(name, Some(value.into_owned()));
                }
            }
            Event::CData(data) => {
                if let (Some(record), Some(name)) = (current.as_mut(), field.as_deref()) {
                    record.set_field(name, Some(String::from_utf8_lossy(&data).into_owned()));
                }
            }
            Event::End(element) => {
                let local = element.local_name();
                let name: &[u8] = local.as_ref();
                if let Some(open) = field.as_deref() {
                    if open.as_bytes() == name {
                        field = None;
                    }
                } else if name == RECORD_TAG {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}
