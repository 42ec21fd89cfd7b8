//! XML round-trip of [`RothCParameters`] documents.
//!
//! Document shape:
//!
//! ```xml
//! <RothC name="..." xmlns="...">
//!   <PlantFractions>
//!     <DPM const="1" min="0" max="1">0.59</DPM>
//!     <RPM const="1" min="0" max="1">0.41</RPM>
//!     <HUM const="1" min="0" max="1">0</HUM>
//!   </PlantFractions>
//!   <FertilizerFractions>...</FertilizerFractions>
//!   <a.a1 const="0" min="40" max="60">47.91</a.a1>
//!   ...
//!   <k.hum const="0" min="0.005" max="0.05">0.02</k.hum>
//! </RothC>
//! ```

use crate::parameters::{RothCParameters, ScalarParameter};
use agem_core::errors::AgemResult;
use agem_core::xml::{
    attr_flag, attr_parse, attr_string, flag, ns, parse_text, schema_error, xml_error,
};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

const ROOT: &str = "RothC";

/// Serialize RothC parameters to an XML document.
pub fn write_rothc(params: &RothCParameters) -> AgemResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new(ROOT);
    root.push_attribute(("name", params.name.as_str()));
    root.push_attribute(("xmlns", ns::ROTHC));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;

    for (element, prefix) in [
        ("PlantFractions", "plant"),
        ("FertilizerFractions", "fertilizer"),
    ] {
        let path = format!("{}/{}", ROOT, element);
        writer
            .write_event(Event::Start(BytesStart::new(element)))
            .map_err(|e| schema_error(&path, e.to_string()))?;
        for pool in ["DPM", "RPM", "HUM"] {
            let name = format!("{}.{}", prefix, pool.to_lowercase());
            let scalar = params
                .scalars()
                .into_iter()
                .find(|(n, _)| *n == name)
                .map(|(_, s)| *s)
                .ok_or_else(|| schema_error(&path, format!("unknown parameter '{}'", name)))?;
            write_scalar(&mut writer, pool, &scalar, &path)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(element)))
            .map_err(|e| schema_error(&path, e.to_string()))?;
    }

    for (name, scalar) in params.scalars() {
        if name.starts_with("plant.") || name.starts_with("fertilizer.") {
            continue;
        }
        write_scalar(&mut writer, name, scalar, ROOT)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| schema_error(ROOT, e.to_string()))
}

/// Parse RothC parameters from an XML document.
///
/// Elements not present in the document keep their default values.
pub fn read_rothc(xml: &str) -> AgemResult<RothCParameters> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut params = None;
    // Section prefix while inside a fractions element.
    let mut section: Option<&'static str> = None;
    // Document name of the scalar element currently open, with its
    // attributes, while waiting for its text content.
    let mut pending: Option<(String, bool, f64, f64)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(|e| xml_error(ROOT, e))? {
            Event::Start(e) if e.name().as_ref() == ROOT.as_bytes() => {
                params = Some(RothCParameters::new(attr_string(&e, "name", ROOT)?));
            }
            Event::Start(e) if e.name().as_ref() == b"PlantFractions" => {
                section = Some("plant");
            }
            Event::Start(e) if e.name().as_ref() == b"FertilizerFractions" => {
                section = Some("fertilizer");
            }
            Event::Start(e) => {
                let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if params.is_none() {
                    return Err(schema_error(ROOT, "root element not found"));
                }
                let target = match (section, raw.as_str()) {
                    (Some(prefix), "DPM" | "RPM" | "HUM") => {
                        format!("{}.{}", prefix, raw.to_lowercase())
                    }
                    (None, name) if name.contains('.') => name.to_string(),
                    _ => {
                        return Err(schema_error(
                            ROOT,
                            format!("unexpected element '{}'", raw),
                        ));
                    }
                };
                let path = format!("{}/{}", ROOT, raw);
                pending = Some((
                    target,
                    attr_flag(&e, "const", &path, false)?,
                    attr_parse(&e, "min", &path)?,
                    attr_parse(&e, "max", &path)?,
                ));
                text.clear();
            }
            Event::Text(e) => {
                if pending.is_some() {
                    text.push_str(&e.unescape().map_err(|err| xml_error(ROOT, err))?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"PlantFractions" | b"FertilizerFractions" => {
                    section = None;
                }
                name if name == ROOT.as_bytes() => break,
                _ => {
                    if let Some((target, constant, min, max)) = pending.take() {
                        let path = format!("{}/{}", ROOT, target);
                        let value = parse_text(&text, &path)?;
                        let params = params.as_mut().ok_or_else(|| {
                            schema_error(ROOT, "root element not found")
                        })?;
                        let scalar = params.scalar_mut(&target).ok_or_else(|| {
                            schema_error(&path, format!("unknown parameter '{}'", target))
                        })?;
                        *scalar = ScalarParameter {
                            value,
                            min,
                            max,
                            constant,
                        };
                    }
                }
            },
            Event::Eof => {
                if params.is_none() {
                    return Err(schema_error(ROOT, "root element not found"));
                }
                return Err(schema_error(ROOT, "unexpected end of document"));
            }
            _ => {}
        }
    }

    let params = params.ok_or_else(|| schema_error(ROOT, "root element not found"))?;
    params.validate()?;
    Ok(params)
}

fn write_scalar(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &str,
    scalar: &ScalarParameter,
    path: &str,
) -> AgemResult<()> {
    let mut elem = BytesStart::new(element);
    elem.push_attribute(("const", flag(scalar.constant)));
    elem.push_attribute(("min", scalar.min.to_string().as_str()));
    elem.push_attribute(("max", scalar.max.to_string().as_str()));
    writer
        .write_event(Event::Start(elem))
        .map_err(|e| schema_error(path, e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(&scalar.value.to_string())))
        .map_err(|e| schema_error(path, e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new(element)))
        .map_err(|e| schema_error(path, e.to_string()))?;
    Ok(())
}
