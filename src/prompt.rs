use std::fmt;

const PLACEHOLDER: &str = "{input}";

/// Instructional preamble wrapped around every user prompt.
pub const PREAMBLE_TEMPLATE: &str = "You are a professional content generator assistant. \
Create clear, concise, and professional content based on user requirements. \n\n\
User Request: {input}\n\n\
Please provide a well-structured, professional response.";

/// Render a template, replacing `{input}` with `input`.
///
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
/// The input is inserted verbatim; braces inside it are left alone.
///
/// # Example
///
/// ```
/// use content_relay::prompt::render;
///
/// let result = render("Echo {input} as {{\"json\"}}", "hi");
/// assert_eq!(result, r#"Echo hi as {"json"}"#);
/// ```
pub fn render(template: &str, input: &str) -> String {
    let mut rendered = String::with_capacity(template.len() + input.len());
    let mut rest = template;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with("{{") {
            rendered.push('{');
            rest = &rest[2..];
        } else if rest.starts_with("}}") {
            rendered.push('}');
            rest = &rest[2..];
        } else if rest.starts_with(PLACEHOLDER) {
            rendered.push_str(input);
            rest = &rest[PLACEHOLDER.len()..];
        } else {
            rendered.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    rendered
}

/// A user prompt wrapped in the instructional preamble.
///
/// May contain sensitive user content, so `Debug` only reports the length.
/// Use [`as_str`](Self::as_str) when the text is actually needed.
#[derive(Clone, PartialEq, Eq)]
pub struct AugmentedPrompt(String);

impl AugmentedPrompt {
    /// Wrap `prompt` in [`PREAMBLE_TEMPLATE`].
    pub fn new(prompt: &str) -> Self {
        Self(render(PREAMBLE_TEMPLATE, prompt))
    }

    /// Build from already-augmented text (tests, alternative preambles).
    pub fn from_raw(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AugmentedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AugmentedPrompt")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Wrap a validated user prompt in the fixed preamble.
pub fn augment(prompt: &str) -> AugmentedPrompt {
    AugmentedPrompt::new(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic() {
        let result = render("Process {input} now", "data");
        assert_eq!(result, "Process data now");
    }

    #[test]
    fn test_render_no_placeholders() {
        let result = render("static prompt", "ignored_in_template");
        assert_eq!(result, "static prompt");
    }

    #[test]
    fn test_render_escaped_braces() {
        let result = render("Input {input}, JSON: {{\"key\": \"val\"}}", "data");
        assert_eq!(result, r#"Input data, JSON: {"key": "val"}"#);
    }

    #[test]
    fn test_render_leaves_input_braces_alone() {
        let result = render("Q: {input}", "what is {{x}} and {input}?");
        assert_eq!(result, "Q: what is {{x}} and {input}?");
    }

    #[test]
    fn test_render_keeps_control_characters_in_input() {
        let input = "keep \u{0}LBRACE\u{0} and \u{0}RBRACE\u{0} literally";
        let result = render("<{input}> {{x}}", input);
        assert_eq!(result, format!("<{}> {{x}}", input));
    }

    #[test]
    fn test_render_escaped_placeholder_stays_literal() {
        assert_eq!(render("{{input}} = {input}", "v"), "{input} = v");
    }

    #[test]
    fn test_render_repeated_placeholder() {
        assert_eq!(render("{input}-{input}", "a"), "a-a");
    }

    #[test]
    fn test_augment_preamble_is_exact() {
        let prompt = augment("X");
        assert!(prompt.as_str().starts_with(
            "You are a professional content generator assistant. Create clear, concise, \
and professional content based on user requirements. \n\nUser Request: X\n\n"
        ));
    }

    #[test]
    fn test_augment_wraps_prompt_verbatim() {
        let prompt = augment("Write a follow-up email");
        assert!(prompt
            .as_str()
            .starts_with("You are a professional content generator assistant."));
        assert!(prompt
            .as_str()
            .contains("User Request: Write a follow-up email\n\n"));
        assert!(prompt
            .as_str()
            .ends_with("Please provide a well-structured, professional response."));
    }

    #[test]
    fn test_augment_contains_user_text_unchanged() {
        for user in ["keep \u{0}LBRACE\u{0} literally", "{{not a template}}", "{input}"] {
            let prompt = augment(user);
            assert!(prompt.as_str().contains(&format!("User Request: {}\n\n", user)));
        }
    }

    #[test]
    fn test_debug_hides_content() {
        let prompt = augment("my secret salary is 100k");
        let debug = format!("{:?}", prompt);
        assert!(!debug.contains("secret"));
        assert!(debug.contains(&prompt.len().to_string()));
    }
}
