//! Text codec for the staging store's array-literal columns.
//!
//! Tag lists, member lists and id arrays are persisted as a single text
//! value in the store's array-literal grammar: `{elem,elem,...}` where each
//! element is an unquoted integer or a `"..."`-quoted string. Quoted strings
//! escape `"`, `\`, newline, carriage return and tab. Rows travelling over
//! the streaming-insert channel need one extra escaping layer (every
//! backslash doubled): the copy channel unescapes once and the array parser
//! unescapes again.
//!
//! This module is deliberately self-contained; it is the most error-prone
//! surface of the staging layer and carries its test weight here.

use waymark_core::{Member, MemberType, MiddleError, OsmId, Tags};

/// NULL marker understood by the streaming-insert channel.
pub const COPY_NULL: &str = "\\N";

/// Which escaping layers to apply when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escaping {
    /// One layer: the value is passed as a prepared-statement parameter and
    /// only the array parser unescapes it.
    Prepared,
    /// Two layers: the value travels through the copy channel first, so
    /// every backslash of the prepared form is doubled.
    Streaming,
}

fn escape_into(out: &mut String, value: &str, escaping: Escaping) {
    let streaming = escaping == Escaping::Streaming;
    for ch in value.chars() {
        match ch {
            '"' => {
                if streaming {
                    out.push('\\');
                }
                out.push('\\');
                out.push('"');
            }
            '\\' => {
                if streaming {
                    out.push_str("\\\\");
                }
                out.push_str("\\\\");
            }
            '\n' => {
                if streaming {
                    out.push('\\');
                }
                out.push_str("\\n");
            }
            '\r' => {
                if streaming {
                    out.push('\\');
                }
                out.push_str("\\r");
            }
            '\t' => {
                if streaming {
                    out.push('\\');
                }
                out.push_str("\\t");
            }
            _ => out.push(ch),
        }
    }
}

fn encode_text_array<'a, I>(items: I, escaping: Escaping) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut iter = items.into_iter().peekable();
    iter.peek()?;

    let mut out = String::from("{");
    let mut first = true;
    for item in iter {
        if !first {
            out.push(',');
        }
        out.push('"');
        escape_into(&mut out, item, escaping);
        out.push('"');
        first = false;
    }
    out.push('}');
    Some(out)
}

/// Encode a tag list as alternating key/value elements.
///
/// Returns `None` for an empty list: prepared-statement callers pass the
/// absent-value sentinel, streaming callers write [`COPY_NULL`].
#[must_use]
pub fn encode_tags(tags: &Tags, escaping: Escaping) -> Option<String> {
    encode_text_array(
        tags.iter()
            .flat_map(|(k, v)| [k.as_str(), v.as_str()]),
        escaping,
    )
}

/// Encode a member list as alternating `<t><id>`/role elements, where `t`
/// is the entity-kind marker byte.
#[must_use]
pub fn encode_members(members: &[Member], escaping: Escaping) -> Option<String> {
    if members.is_empty() {
        return None;
    }
    let refs: Vec<String> = members
        .iter()
        .map(|m| format!("{}{}", m.kind.marker(), m.id))
        .collect();
    encode_text_array(
        members
            .iter()
            .zip(refs.iter())
            .flat_map(|(m, r)| [r.as_str(), m.role.as_str()]),
        escaping,
    )
}

/// Encode an id array. Integers never need escaping, so the result is valid
/// for both channels.
#[must_use]
pub fn encode_ids(ids: &[OsmId]) -> String {
    let mut out = String::from("{");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&id.to_string());
    }
    out.push('}');
    out
}

fn malformed(context: &'static str, text: &str) -> MiddleError {
    MiddleError::MalformedData {
        context,
        text: text.to_owned(),
    }
}

/// Parse an array literal into its elements, undoing one escaping layer.
///
/// An empty input decodes to an empty list (a NULL column reads back as an
/// empty string). Anything else must be a brace-delimited literal.
pub fn decode_text_array(text: &str) -> Result<Vec<String>, MiddleError> {
    const CONTEXT: &str = "array literal";

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut chars = text.chars().peekable();
    if chars.next() != Some('{') {
        return Err(malformed(CONTEXT, text));
    }

    let mut elements = Vec::new();
    if chars.peek() == Some(&'}') {
        chars.next();
        return match chars.next() {
            None => Ok(elements),
            Some(_) => Err(malformed(CONTEXT, text)),
        };
    }

    loop {
        let mut element = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
        }

        // The element runs to its closing quote, or to an unquoted
        // delimiter.
        let mut delimiter = None;
        loop {
            let Some(ch) = chars.next() else {
                return Err(malformed(CONTEXT, text));
            };
            match ch {
                '\\' => {
                    let Some(esc) = chars.next() else {
                        return Err(malformed(CONTEXT, text));
                    };
                    element.push(match esc {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                }
                '"' if quoted => break,
                ',' | '}' if !quoted => {
                    delimiter = Some(ch);
                    break;
                }
                other => element.push(other),
            }
        }
        elements.push(element);

        let delimiter = match delimiter {
            Some(ch) => ch,
            // A quoted element must be followed by a delimiter of its own.
            None => match chars.next() {
                Some(ch @ (',' | '}')) => ch,
                _ => return Err(malformed(CONTEXT, text)),
            },
        };
        if delimiter == '}' {
            return match chars.next() {
                None => Ok(elements),
                Some(_) => Err(malformed(CONTEXT, text)),
            };
        }
    }
}

/// Parse an integer array literal. When `expected` is given, a length
/// mismatch is treated as store corruption.
pub fn decode_ids(text: &str, expected: Option<usize>) -> Result<Vec<OsmId>, MiddleError> {
    const CONTEXT: &str = "id array";

    let elements = decode_text_array(text)?;
    let mut ids = Vec::with_capacity(elements.len());
    for element in &elements {
        ids.push(
            element
                .parse::<OsmId>()
                .map_err(|_| malformed(CONTEXT, text))?,
        );
    }
    if let Some(expected) = expected {
        if ids.len() != expected {
            return Err(malformed(CONTEXT, text));
        }
    }
    Ok(ids)
}

/// Parse a tag array literal back into ordered key/value pairs.
pub fn decode_tags(text: &str) -> Result<Tags, MiddleError> {
    let elements = decode_text_array(text)?;
    if elements.len() % 2 != 0 {
        return Err(malformed("tag list", text));
    }
    let mut tags = Tags::with_capacity(elements.len() / 2);
    let mut iter = elements.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        tags.push((key, value));
    }
    Ok(tags)
}

/// Parse a member array literal, restoring the entity kind from the marker
/// byte. `expected` is the persisted member count; a mismatch is store
/// corruption.
pub fn decode_members(text: &str, expected: usize) -> Result<Vec<Member>, MiddleError> {
    const CONTEXT: &str = "member list";

    let elements = decode_text_array(text)?;
    if elements.len() % 2 != 0 || elements.len() / 2 != expected {
        return Err(malformed(CONTEXT, text));
    }

    let mut members = Vec::with_capacity(expected);
    let mut iter = elements.into_iter();
    while let (Some(reference), Some(role)) = (iter.next(), iter.next()) {
        let mut chars = reference.chars();
        let kind = chars
            .next()
            .and_then(MemberType::from_marker)
            .ok_or_else(|| malformed(CONTEXT, &reference))?;
        let id = chars
            .as_str()
            .parse::<OsmId>()
            .map_err(|_| malformed(CONTEXT, &reference))?;
        members.push(Member { kind, id, role });
    }
    Ok(members)
}

/// Undo the copy-channel escaping layer of a single row field.
///
/// Returns `None` for the NULL marker. The result of a field produced with
/// [`Escaping::Streaming`] is the corresponding [`Escaping::Prepared`] form.
#[must_use]
pub fn unescape_copy_field(field: &str) -> Option<String> {
    if field == COPY_NULL {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

/// Split one streaming-insert row into its unescaped fields.
pub fn split_copy_row(row: &str) -> Vec<Option<String>> {
    row.strip_suffix('\n')
        .unwrap_or(row)
        .split('\t')
        .map(unescape_copy_field)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[rstest]
    fn empty_tag_list_encodes_to_the_absent_sentinel() {
        assert_eq!(encode_tags(&Tags::new(), Escaping::Prepared), None);
        assert_eq!(encode_tags(&Tags::new(), Escaping::Streaming), None);
    }

    #[rstest]
    fn plain_tags_round_trip() {
        let input = tags(&[("name", "X"), ("highway", "residential")]);
        let encoded = encode_tags(&input, Escaping::Prepared).expect("non-empty");
        assert_eq!(encoded, r#"{"name","X","highway","residential"}"#);
        assert_eq!(decode_tags(&encoded).expect("decode"), input);
    }

    #[rstest]
    #[case("quote\"inside")]
    #[case("back\\slash")]
    #[case("line\nbreak")]
    #[case("tab\there")]
    #[case("cr\rhere")]
    #[case("mixed\\\"\n\r\t")]
    #[case("unicode Ærø 東京")]
    #[case("{braces,commas}")]
    fn hostile_values_round_trip_in_prepared_mode(#[case] value: &str) {
        let input = tags(&[("k", value)]);
        let encoded = encode_tags(&input, Escaping::Prepared).expect("non-empty");
        assert_eq!(decode_tags(&encoded).expect("decode"), input);
    }

    #[rstest]
    #[case("quote\"inside")]
    #[case("back\\slash")]
    #[case("line\nbreak")]
    #[case("mixed\\\"\n\r\t end")]
    fn streaming_mode_survives_both_unescaping_layers(#[case] value: &str) {
        let input = tags(&[("k", value)]);
        let encoded = encode_tags(&input, Escaping::Streaming).expect("non-empty");
        // The copy channel unescapes once, the array parser once more.
        let after_copy = unescape_copy_field(&encoded).expect("not null");
        assert_eq!(
            after_copy,
            encode_tags(&input, Escaping::Prepared).expect("non-empty")
        );
        assert_eq!(decode_tags(&after_copy).expect("decode"), input);
    }

    #[rstest]
    fn id_arrays_round_trip() {
        let ids = vec![1, -5, 9_000_000_000, 2];
        let encoded = encode_ids(&ids);
        assert_eq!(encoded, "{1,-5,9000000000,2}");
        assert_eq!(decode_ids(&encoded, Some(4)).expect("decode"), ids);
    }

    #[rstest]
    fn empty_id_array_round_trips() {
        assert_eq!(encode_ids(&[]), "{}");
        assert_eq!(decode_ids("{}", Some(0)).expect("decode"), Vec::<OsmId>::new());
    }

    #[rstest]
    fn id_array_length_mismatch_is_malformed() {
        let err = decode_ids("{1,2,3}", Some(2)).expect_err("mismatch");
        assert!(matches!(err, MiddleError::MalformedData { .. }));
    }

    #[rstest]
    fn decoder_accepts_unquoted_and_quoted_elements() {
        let decoded = decode_text_array(r#"{plain,"quoted, with comma",42}"#).expect("decode");
        assert_eq!(decoded, vec!["plain", "quoted, with comma", "42"]);
    }

    #[rstest]
    fn null_column_reads_back_empty() {
        assert_eq!(decode_text_array("").expect("decode"), Vec::<String>::new());
        assert_eq!(decode_tags("").expect("decode"), Tags::new());
    }

    #[rstest]
    #[case("no brace")]
    #[case("{unterminated")]
    #[case(r#"{"unterminated}"#)]
    #[case("{1,2}garbage")]
    #[case("{}x")]
    fn malformed_literals_are_rejected(#[case] text: &str) {
        let err = decode_text_array(text).expect_err("malformed");
        assert!(matches!(err, MiddleError::MalformedData { .. }));
    }

    #[rstest]
    fn odd_tag_element_count_is_malformed() {
        let err = decode_tags(r#"{"key"}"#).expect_err("odd count");
        assert!(matches!(err, MiddleError::MalformedData { .. }));
    }

    #[rstest]
    fn members_round_trip_with_roles() {
        let members = vec![
            Member::new(MemberType::Node, 1, "stop"),
            Member::new(MemberType::Way, 10, "outer ring"),
            Member::new(MemberType::Relation, 20, ""),
        ];
        let encoded = encode_members(&members, Escaping::Prepared).expect("non-empty");
        assert_eq!(decode_members(&encoded, 3).expect("decode"), members);
    }

    #[rstest]
    fn member_count_mismatch_is_malformed() {
        let members = vec![Member::new(MemberType::Node, 1, "a")];
        let encoded = encode_members(&members, Escaping::Prepared).expect("non-empty");
        let err = decode_members(&encoded, 2).expect_err("mismatch");
        assert!(matches!(err, MiddleError::MalformedData { .. }));
    }

    #[rstest]
    fn unknown_member_marker_is_malformed() {
        let err = decode_members(r#"{"x1","role"}"#, 1).expect_err("marker");
        assert!(matches!(err, MiddleError::MalformedData { .. }));
    }

    #[rstest]
    fn copy_rows_split_into_unescaped_fields() {
        let fields = split_copy_row("17\t52.5000000000\t13.4000000000\t\\N\n");
        assert_eq!(
            fields,
            vec![
                Some("17".to_owned()),
                Some("52.5000000000".to_owned()),
                Some("13.4000000000".to_owned()),
                None,
            ]
        );
    }

    #[rstest]
    fn decoding_is_stable_for_token_free_ascii() {
        let decoded = decode_text_array(r#"{"simple","values"}"#).expect("decode");
        assert_eq!(decoded, vec!["simple", "values"]);
    }
}
