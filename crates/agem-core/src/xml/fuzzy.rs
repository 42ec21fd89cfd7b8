//! XML round-trip of [`FuzzyInferenceScheme`] documents.
//!
//! Document shape:
//!
//! ```xml
//! <FuzzyInferenceScheme name="..." xmlns="...">
//!   <Factor portId="0" name="x" min="0" max="100">
//!     <FuzzySet type="Triangular" priority="0" const="0" position="left">
//!       <Triangular center="0" left="9999" right="40"/>
//!     </FuzzySet>
//!   </Factor>
//!   <Responses min="0" max="10">
//!     <Response const="0" sd="0">5</Response>
//!   </Responses>
//! </FuzzyInferenceScheme>
//! ```

use crate::errors::AgemResult;
use crate::fuzzy::scheme::{Factor, FuzzyInferenceScheme, FuzzySet, Response, SetPosition};
use crate::xml::{
    attr_flag, attr_parse, attr_parse_or, attr_string, flag, ns, parse_text, schema_error,
    xml_error,
};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

const ROOT: &str = "FuzzyInferenceScheme";

/// Serialize a fuzzy inference scheme to an XML document.
pub fn write_fuzzy_scheme(scheme: &FuzzyInferenceScheme) -> AgemResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_fis_into(&mut writer, scheme, true)?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| schema_error(ROOT, e.to_string()))
}

/// Parse a fuzzy inference scheme from an XML document.
pub fn read_fuzzy_scheme(xml: &str) -> AgemResult<FuzzyInferenceScheme> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(|e| xml_error(ROOT, e))? {
            Event::Start(e) if e.name().as_ref() == ROOT.as_bytes() => {
                let name = attr_string(&e, "name", ROOT)?;
                return parse_fis_body(&mut reader, name);
            }
            Event::Eof => {
                return Err(schema_error(ROOT, "root element not found"));
            }
            _ => {}
        }
    }
}

/// Write the scheme under its root element into an open writer.
pub(crate) fn write_fis_into(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    scheme: &FuzzyInferenceScheme,
    with_namespace: bool,
) -> AgemResult<()> {
    let mut root = BytesStart::new(ROOT);
    root.push_attribute(("name", scheme.name.as_str()));
    if with_namespace {
        root.push_attribute(("xmlns", ns::FUZZY_INFERENCE_SCHEME));
    }
    writer
        .write_event(Event::Start(root))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;

    for factor in &scheme.factors {
        let path = format!("{}/Factor[{}]", ROOT, factor.name);
        let mut elem = BytesStart::new("Factor");
        elem.push_attribute(("portId", factor.port_id.to_string().as_str()));
        elem.push_attribute(("name", factor.name.as_str()));
        elem.push_attribute(("min", factor.min.to_string().as_str()));
        elem.push_attribute(("max", factor.max.to_string().as_str()));
        writer
            .write_event(Event::Start(elem))
            .map_err(|e| schema_error(&path, e.to_string()))?;

        for set in &factor.sets {
            let mut elem = BytesStart::new("FuzzySet");
            elem.push_attribute(("type", "Triangular"));
            elem.push_attribute(("priority", set.priority.to_string().as_str()));
            elem.push_attribute(("const", flag(set.constant)));
            elem.push_attribute(("position", position_name(set.position)));
            writer
                .write_event(Event::Start(elem))
                .map_err(|e| schema_error(&path, e.to_string()))?;

            let mut shape = BytesStart::new("Triangular");
            shape.push_attribute(("center", set.center.to_string().as_str()));
            shape.push_attribute(("left", set.left_width.to_string().as_str()));
            shape.push_attribute(("right", set.right_width.to_string().as_str()));
            writer
                .write_event(Event::Empty(shape))
                .map_err(|e| schema_error(&path, e.to_string()))?;

            writer
                .write_event(Event::End(BytesEnd::new("FuzzySet")))
                .map_err(|e| schema_error(&path, e.to_string()))?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("Factor")))
            .map_err(|e| schema_error(&path, e.to_string()))?;
    }

    let path = format!("{}/Responses", ROOT);
    let mut elem = BytesStart::new("Responses");
    elem.push_attribute(("min", scheme.response_min.to_string().as_str()));
    elem.push_attribute(("max", scheme.response_max.to_string().as_str()));
    writer
        .write_event(Event::Start(elem))
        .map_err(|e| schema_error(&path, e.to_string()))?;

    for response in &scheme.responses {
        let mut elem = BytesStart::new("Response");
        elem.push_attribute(("const", flag(response.constant)));
        elem.push_attribute(("sd", response.sd.to_string().as_str()));
        writer
            .write_event(Event::Start(elem))
            .map_err(|e| schema_error(&path, e.to_string()))?;
        writer
            .write_event(Event::Text(BytesText::new(&response.value.to_string())))
            .map_err(|e| schema_error(&path, e.to_string()))?;
        writer
            .write_event(Event::End(BytesEnd::new("Response")))
            .map_err(|e| schema_error(&path, e.to_string()))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Responses")))
        .map_err(|e| schema_error(&path, e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .map_err(|e| schema_error(ROOT, e.to_string()))?;
    Ok(())
}

/// Consume events after the scheme's start tag up to its end tag and build
/// the validated scheme.
pub(crate) fn parse_fis_body(
    reader: &mut Reader<&[u8]>,
    name: String,
) -> AgemResult<FuzzyInferenceScheme> {
    let mut factors: Vec<Factor> = Vec::new();
    let mut responses: Vec<Response> = Vec::new();
    let mut response_min = 0.0;
    let mut response_max = 0.0;
    let mut saw_responses = false;

    // Parser state for the element currently open.
    let mut current_factor: Option<Factor> = None;
    let mut pending_set: Option<(u32, bool, SetPosition)> = None;
    let mut pending_response: Option<(bool, f64)> = None;
    let mut response_text = String::new();

    loop {
        match reader.read_event().map_err(|e| xml_error(ROOT, e))? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Factor" => {
                let path = format!("{}/Factor", ROOT);
                current_factor = Some(Factor {
                    name: attr_string(&e, "name", &path)?,
                    port_id: attr_parse_or(&e, "portId", &path, 0)?,
                    min: attr_parse(&e, "min", &path)?,
                    max: attr_parse(&e, "max", &path)?,
                    sets: Vec::new(),
                });
            }
            Event::Start(e) if e.name().as_ref() == b"FuzzySet" => {
                let path = format!("{}/Factor/FuzzySet", ROOT);
                let kind = attr_string(&e, "type", &path)?;
                if kind != "Triangular" {
                    return Err(schema_error(
                        &path,
                        format!("unsupported fuzzy set type '{}'", kind),
                    ));
                }
                pending_set = Some((
                    attr_parse_or(&e, "priority", &path, 0)?,
                    attr_flag(&e, "const", &path, false)?,
                    parse_position(&attr_string(&e, "position", &path)?, &path)?,
                ));
            }
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"Triangular" => {
                let path = format!("{}/Factor/FuzzySet/Triangular", ROOT);
                let (priority, constant, position) = pending_set.ok_or_else(|| {
                    schema_error(&path, "Triangular outside of a FuzzySet element")
                })?;
                let factor = current_factor.as_mut().ok_or_else(|| {
                    schema_error(&path, "FuzzySet outside of a Factor element")
                })?;
                factor.sets.push(FuzzySet {
                    center: attr_parse(&e, "center", &path)?,
                    left_width: attr_parse(&e, "left", &path)?,
                    right_width: attr_parse(&e, "right", &path)?,
                    position,
                    priority,
                    constant,
                });
            }
            Event::Start(e) if e.name().as_ref() == b"Responses" => {
                let path = format!("{}/Responses", ROOT);
                response_min = attr_parse(&e, "min", &path)?;
                response_max = attr_parse(&e, "max", &path)?;
                saw_responses = true;
            }
            Event::Start(e) if e.name().as_ref() == b"Response" => {
                let path = format!("{}/Responses/Response", ROOT);
                pending_response = Some((
                    attr_flag(&e, "const", &path, false)?,
                    attr_parse_or(&e, "sd", &path, 0.0)?,
                ));
                response_text.clear();
            }
            Event::Text(e) => {
                if pending_response.is_some() {
                    response_text.push_str(
                        &e.unescape()
                            .map_err(|err| xml_error(ROOT, err))?,
                    );
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"Factor" => {
                    if let Some(factor) = current_factor.take() {
                        factors.push(factor);
                    }
                }
                b"FuzzySet" => {
                    pending_set = None;
                }
                b"Response" => {
                    let path = format!("{}/Responses/Response", ROOT);
                    let (constant, sd) = pending_response.take().ok_or_else(|| {
                        schema_error(&path, "unbalanced Response element")
                    })?;
                    responses.push(Response {
                        value: parse_text(&response_text, &path)?,
                        sd,
                        constant,
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

    if !saw_responses {
        return Err(schema_error(
            &format!("{}/Responses", ROOT),
            "missing Responses element",
        ));
    }

    let scheme = FuzzyInferenceScheme::new(name, factors, responses, response_min, response_max);
    scheme.validate()?;
    Ok(scheme)
}

fn position_name(position: SetPosition) -> &'static str {
    match position {
        SetPosition::Left => "left",
        SetPosition::Intermediate => "intermediate",
        SetPosition::Right => "right",
    }
}

fn parse_position(raw: &str, path: &str) -> AgemResult<SetPosition> {
    match raw {
        "left" => Ok(SetPosition::Left),
        "intermediate" => Ok(SetPosition::Intermediate),
        "right" => Ok(SetPosition::Right),
        _ => Err(schema_error(
            path,
            format!("unknown fuzzy set position '{}'", raw),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgemError;
    use crate::parameter::Calibratable;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_scheme() -> FuzzyInferenceScheme {
        let mut scheme = FuzzyInferenceScheme::with_uniform_partition(
            "n2o",
            &[("Temperature", -10.0, 35.0, 3), ("Nitrogen", 0.0, 250.0, 2)],
            0.0,
            12.5,
        )
        .unwrap();
        scheme.responses[2].sd = 0.25;
        scheme.responses[4].constant = true;
        scheme.factors[0].sets[1].constant = true;
        scheme
    }

    #[test]
    fn round_trip_is_lossless() {
        let scheme = sample_scheme();
        let xml = write_fuzzy_scheme(&scheme).unwrap();
        let reread = read_fuzzy_scheme(&xml).unwrap();

        assert_eq!(reread.name, scheme.name);
        assert_eq!(reread.factors.len(), scheme.factors.len());
        assert_eq!(reread.num_rules(), scheme.num_rules());
        for (a, b) in scheme.factors.iter().zip(&reread.factors) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.min, b.min);
            assert_eq!(a.max, b.max);
            for (x, y) in a.sets.iter().zip(&b.sets) {
                assert_eq!(x.center, y.center);
                assert_eq!(x.left_width, y.left_width);
                assert_eq!(x.right_width, y.right_width);
                assert_eq!(x.position, y.position);
                assert_eq!(x.constant, y.constant);
            }
        }
        for (a, b) in scheme.responses.iter().zip(&reread.responses) {
            assert_eq!(a.value, b.value);
            assert_eq!(a.sd, b.sd);
            assert_eq!(a.constant, b.constant);
        }
    }

    #[test]
    fn round_trip_survives_random_mutation() {
        let mut scheme = sample_scheme();
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for _ in 0..50 {
            scheme.modify_parameter_randomly(0.2, &mut rng);
        }

        let xml0 = write_fuzzy_scheme(&scheme).unwrap();
        let reread = read_fuzzy_scheme(&xml0).unwrap();
        let xml1 = write_fuzzy_scheme(&reread).unwrap();
        assert_eq!(xml0, xml1);
    }

    #[test]
    fn namespace_is_emitted_on_the_root() {
        let xml = write_fuzzy_scheme(&sample_scheme()).unwrap();
        assert!(xml.contains(ns::FUZZY_INFERENCE_SCHEME));
    }

    #[test]
    fn missing_attribute_is_schema_error() {
        let xml = r#"<FuzzyInferenceScheme name="broken">
            <Factor name="x" min="0"><FuzzySet type="Triangular" position="left">
            <Triangular center="0" left="1" right="1"/></FuzzySet></Factor>
            </FuzzyInferenceScheme>"#;
        assert!(matches!(
            read_fuzzy_scheme(xml),
            Err(AgemError::Schema { .. })
        ));
    }

    #[test]
    fn malformed_number_is_schema_error() {
        let xml = r#"<FuzzyInferenceScheme name="broken">
            <Factor name="x" min="zero" max="1"/>
            </FuzzyInferenceScheme>"#;
        let err = read_fuzzy_scheme(xml).unwrap_err();
        assert!(err.to_string().contains("min"));
    }

    #[test]
    fn inconsistent_rule_count_is_rejected() {
        let xml = write_fuzzy_scheme(&sample_scheme()).unwrap();
        // Drop one Response element from the document.
        let start = xml.find("<Response ").unwrap();
        let end = xml[start..].find("</Response>").unwrap() + start + "</Response>".len();
        let broken = format!("{}{}", &xml[..start], &xml[end..]);
        assert!(matches!(
            read_fuzzy_scheme(&broken),
            Err(AgemError::Invariant(_))
        ));
    }
}
