/// Replace `${ENV_VAR}` placeholders in the raw config text.
///
/// Unresolvable or malformed placeholders are left as written.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                out.push_str("${");
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        (name == "KNOWN").then(|| "value".to_string())
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(substitute_with("url = \"${KNOWN}\"", lookup), "url = \"value\"");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(substitute_with("x=${MISSING}", lookup), "x=${MISSING}");
    }

    #[test]
    fn leaves_unclosed_placeholder() {
        assert_eq!(substitute_with("x=${KNOWN", lookup), "x=${KNOWN");
    }

    #[test]
    fn handles_multiple_placeholders() {
        assert_eq!(
            substitute_with("${KNOWN}-${KNOWN}", lookup),
            "value-value"
        );
    }
}
