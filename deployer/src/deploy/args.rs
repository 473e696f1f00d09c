//! Splits free-form flag strings into argument lists

/// Split `input` into arguments.
///
/// Unquoted whitespace separates arguments. A single or double quote opens a
/// span that runs until the same quote character, keeping whitespace and the
/// other quote character literal. A backslash takes the next character
/// literally, inside or outside quotes. Empty arguments are never produced and
/// a dangling backslash at the end of input is dropped.
pub fn split_flags(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }

        match (c, quote) {
            ('\\', _) => escaped = true,
            (c, Some(open)) if c == open => quote = None,
            (c, Some(_)) => current.push(c),
            ('"' | '\'', None) => quote = Some(c),
            (c, None) if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            (c, None) => current.push(c),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// [`split_flags`] over an optional flag string
pub fn split_optional_flags(input: Option<&str>) -> Vec<String> {
    input.map(split_flags).unwrap_or_default()
}
