//! XML round-trip of weighting schemes, standalone or combined with a
//! fuzzy inference scheme under a `WeightedFuzzyInferenceScheme` root.

use crate::errors::AgemResult;
use crate::fuzzy::scheme::FuzzyInferenceScheme;
use crate::weighting::{Weight, WeightingScheme};
use crate::xml::fuzzy::{parse_fis_body, write_fis_into};
use crate::xml::{
    attr_flag, attr_parse, attr_parse_or, attr_string, flag, ns, parse_text, schema_error,
    xml_error,
};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

const ROOT: &str = "Weighting";
const COMBINED_ROOT: &str = "WeightedFuzzyInferenceScheme";

/// A fuzzy inference scheme with a categorical weighting applied to its
/// output, as stored in a single parameter document.
#[derive(Debug, Clone)]
pub struct WeightedFuzzyInferenceScheme {
    pub name: String,
    pub fuzzy: FuzzyInferenceScheme,
    pub weighting: WeightingScheme,
}

/// Serialize a weighting scheme to an XML document.
pub fn write_weighting_scheme(scheme: &WeightingScheme) -> AgemResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_weighting_into(&mut writer, scheme, true)?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| schema_error(ROOT, e.to_string()))
}

/// Parse a weighting scheme from an XML document.
pub fn read_weighting_scheme(xml: &str) -> AgemResult<WeightingScheme> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(|e| xml_error(ROOT, e))? {
            Event::Start(e) if e.name().as_ref() == ROOT.as_bytes() => {
                let name = attr_string(&e, "name", ROOT)?;
                return parse_weighting_body(&mut reader, name);
            }
            Event::Eof => {
                return Err(schema_error(ROOT, "root element not found"));
            }
            _ => {}
        }
    }
}

/// Serialize a combined fuzzy-plus-weighting document.
pub fn write_weighted_fuzzy_scheme(scheme: &WeightedFuzzyInferenceScheme) -> AgemResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new(COMBINED_ROOT);
    root.push_attribute(("name", scheme.name.as_str()));
    root.push_attribute(("xmlns", ns::WEIGHTED_FUZZY_INFERENCE_SCHEME));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| schema_error(COMBINED_ROOT, e.to_string()))?;

    write_fis_into(&mut writer, &scheme.fuzzy, false)?;
    write_weighting_into(&mut writer, &scheme.weighting, false)?;

    writer
        .write_event(Event::End(BytesEnd::new(COMBINED_ROOT)))
        .map_err(|e| schema_error(COMBINED_ROOT, e.to_string()))?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| schema_error(COMBINED_ROOT, e.to_string()))
}

/// Parse a combined fuzzy-plus-weighting document.
pub fn read_weighted_fuzzy_scheme(xml: &str) -> AgemResult<WeightedFuzzyInferenceScheme> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut name = None;
    let mut fuzzy = None;
    let mut weighting = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| xml_error(COMBINED_ROOT, e))?
        {
            Event::Start(e) if e.name().as_ref() == COMBINED_ROOT.as_bytes() => {
                name = Some(attr_string(&e, "name", COMBINED_ROOT)?);
            }
            Event::Start(e) if e.name().as_ref() == b"FuzzyInferenceScheme" => {
                let path = format!("{}/FuzzyInferenceScheme", COMBINED_ROOT);
                let inner_name = attr_string(&e, "name", &path)?;
                fuzzy = Some(parse_fis_body(&mut reader, inner_name)?);
            }
            Event::Start(e) if e.name().as_ref() == ROOT.as_bytes() => {
                let path = format!("{}/{}", COMBINED_ROOT, ROOT);
                let inner_name = attr_string(&e, "name", &path)?;
                weighting = Some(parse_weighting_body(&mut reader, inner_name)?);
            }
            Event::End(e) if e.name().as_ref() == COMBINED_ROOT.as_bytes() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    let name = name.ok_or_else(|| schema_error(COMBINED_ROOT, "root element not found"))?;
    let fuzzy = fuzzy.ok_or_else(|| {
        schema_error(COMBINED_ROOT, "missing FuzzyInferenceScheme element")
    })?;
    let weighting =
        weighting.ok_or_else(|| schema_error(COMBINED_ROOT, "missing Weighting element"))?;
    Ok(WeightedFuzzyInferenceScheme {
        name,
        fuzzy,
        weighting,
    })
}

fn write_weighting_into(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    scheme: &WeightingScheme,
    with_namespace: bool,
) -> AgemResult<()> {
    let mut root = BytesStart::new(ROOT);
    root.push_attribute(("name", scheme.name.as_str()));
    if with_namespace {
        root.push_attribute(("xmlns", ns::WEIGHTING));
    }
    writer
        .write_event(Event::Start(root))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;

    let mut factor = BytesStart::new("Factor");
    factor.push_attribute(("name", scheme.factor_name.as_str()));
    writer
        .write_event(Event::Empty(factor))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;

    let path = format!("{}/Weights", ROOT);
    writer
        .write_event(Event::Start(BytesStart::new("Weights")))
        .map_err(|e| schema_error(&path, e.to_string()))?;
    for weight in &scheme.weights {
        let mut elem = BytesStart::new("Weight");
        elem.push_attribute(("id", weight.id.to_string().as_str()));
        elem.push_attribute(("const", flag(weight.constant)));
        elem.push_attribute(("active", flag(weight.active)));
        elem.push_attribute(("min", weight.min.to_string().as_str()));
        elem.push_attribute(("max", weight.max.to_string().as_str()));
        writer
            .write_event(Event::Start(elem))
            .map_err(|e| schema_error(&path, e.to_string()))?;
        writer
            .write_event(Event::Text(BytesText::new(&weight.value.to_string())))
            .map_err(|e| schema_error(&path, e.to_string()))?;
        writer
            .write_event(Event::End(BytesEnd::new("Weight")))
            .map_err(|e| schema_error(&path, e.to_string()))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("Weights")))
        .map_err(|e| schema_error(&path, e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;
    Ok(())
}

fn parse_weighting_body(reader: &mut Reader<&[u8]>, name: String) -> AgemResult<WeightingScheme> {
    let mut factor_name: Option<String> = None;
    let mut weights: Vec<Weight> = Vec::new();
    let mut pending: Option<(i64, bool, bool, f64, f64)> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(|e| xml_error(ROOT, e))? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Factor" => {
                let path = format!("{}/Factor", ROOT);
                factor_name = Some(attr_string(&e, "name", &path)?);
            }
            Event::Start(e) if e.name().as_ref() == b"Weight" => {
                let path = format!("{}/Weights/Weight", ROOT);
                pending = Some((
                    attr_parse(&e, "id", &path)?,
                    attr_flag(&e, "const", &path, false)?,
                    attr_flag(&e, "active", &path, true)?,
                    attr_parse_or(&e, "min", &path, 0.0)?,
                    attr_parse_or(&e, "max", &path, 1.0)?,
                ));
                text.clear();
            }
            Event::Text(e) => {
                if pending.is_some() {
                    text.push_str(&e.unescape().map_err(|err| xml_error(ROOT, err))?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"Weight" => {
                    let path = format!("{}/Weights/Weight", ROOT);
                    let (id, constant, active, min, max) = pending
                        .take()
                        .ok_or_else(|| schema_error(&path, "unbalanced Weight element"))?;
                    weights.push(Weight {
                        id,
                        min,
                        max,
                        value: parse_text(&text, &path)?,
                        constant,
                        active,
                    });
                }
                name if name == ROOT.as_bytes() => break,
                _ => {}
            },
            Event::Eof => {
                return Err(schema_error(ROOT, "unexpected end of document"));
            }
            _ => {}
        }
    }

    let factor_name = factor_name
        .ok_or_else(|| schema_error(&format!("{}/Factor", ROOT), "missing Factor element"))?;
    let scheme = WeightingScheme::new(name, factor_name, weights);
    scheme.validate()?;
    Ok(scheme)
}
