use std::collections::BTreeMap;

use dicom::core::value::Value;
use dicom::core::{Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};
use serde::{Deserialize, Serialize};

/// Typed rendering of a single element value, detached from the DICOM object it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TagValue {
    Text { value: String },
    Binary { len: usize },
    Sequence { items: usize },
}

impl TagValue {
    pub fn text(value: impl Into<String>) -> Self {
        TagValue::Text {
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TagValue::Text { value } => value.is_empty(),
            TagValue::Binary { len } => *len == 0,
            TagValue::Sequence { items } => *items == 0,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text { value } => Some(value),
            _ => None,
        }
    }

    /// Short human-readable form used in reports.
    pub fn display(&self) -> String {
        match self {
            TagValue::Text { value } => value.clone(),
            TagValue::Binary { len } => format!("<{len} bytes>"),
            TagValue::Sequence { items } => format!("<sequence: {items} item(s)>"),
        }
    }
}

/// Small helper trait to pull values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    /// Every top-level element rendered as a [`TagValue`].
    fn tag_values(&self) -> BTreeMap<Tag, TagValue>;
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| clean_text(&s))
    }

    fn tag_values(&self) -> BTreeMap<Tag, TagValue> {
        let mut values = BTreeMap::new();
        for elem in self.iter() {
            let header = elem.header();
            let value = match elem.value() {
                Value::Primitive(p) => {
                    if is_binary_vr(header.vr) {
                        TagValue::Binary {
                            len: p.to_bytes().len(),
                        }
                    } else {
                        TagValue::text(clean_text(&p.to_str()))
                    }
                }
                Value::Sequence(seq) => TagValue::Sequence {
                    items: seq.items().len(),
                },
                Value::PixelSequence(p) => TagValue::Binary {
                    len: p.fragments().iter().map(|f| f.len()).sum(),
                },
            };
            values.insert(header.tag, value);
        }
        values
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        let inner: &InMemDicomObject<StandardDataDictionary> = self;
        inner.element_str(tag)
    }

    fn tag_values(&self) -> BTreeMap<Tag, TagValue> {
        let inner: &InMemDicomObject<StandardDataDictionary> = self;
        inner.tag_values()
    }
}

fn clean_text(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

pub(crate) fn is_binary_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue};

    #[test]
    fn values_are_trimmed_and_typed() {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        obj.put(DataElement::new(
            Tag(0x0008, 0x0060),
            VR::CS,
            PrimitiveValue::from("MR "),
        ));
        obj.put(DataElement::new(
            Tag(0x0010, 0x0010),
            VR::PN,
            PrimitiveValue::Empty,
        ));
        obj.put(DataElement::new(
            Tag(0x0029, 0x1010),
            VR::OB,
            PrimitiveValue::from(vec![1_u8, 2, 3, 4]),
        ));

        let values = obj.tag_values();
        assert_eq!(values[&Tag(0x0008, 0x0060)], TagValue::text("MR"));
        assert!(values[&Tag(0x0010, 0x0010)].is_empty());
        assert_eq!(values[&Tag(0x0029, 0x1010)], TagValue::Binary { len: 4 });
        assert_eq!(obj.element_str(Tag(0x0008, 0x0060)).as_deref(), Some("MR"));
        assert_eq!(obj.element_str(Tag(0x0020, 0x000E)), None);
    }
}
