//! Prompt shaping for the devotional companion persona.

use super::provider::GenerationOptions;

pub const DEFAULT_PERSONA: &str = "You are a warm, patient Christian companion. \
Answer with scripture where it helps, cite book, chapter and verse, \
and never invent verses.";

/// Builds the system preamble from the generation options plus any system-role history.
pub fn compose_preamble(options: &GenerationOptions, system_parts: &[String]) -> String {
    let mut parts = Vec::new();

    let persona = options
        .persona_override
        .as_deref()
        .map(str::trim)
        .filter(|persona| !persona.is_empty())
        .unwrap_or(DEFAULT_PERSONA);
    parts.push(persona.to_string());

    if let Some(translation) = options
        .translation_id
        .as_deref()
        .map(str::trim)
        .filter(|translation| !translation.is_empty())
    {
        parts.push(format!(
            "When quoting the Bible, use the {translation} translation."
        ));
    }

    let language = options.language.trim();
    if !language.is_empty() {
        parts.push(format!("Always reply in the language with code '{language}'."));
    }

    if let Some(name) = options
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        parts.push(format!("The person you are talking with is called {name}."));
    }

    parts.extend(
        system_parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(str::to_string),
    );

    parts.join("\n\n")
}

/// Appends hidden instructions to the visible prompt.
pub fn compose_prompt(prompt: &str, hidden_context: Option<&str>) -> String {
    match hidden_context.map(str::trim) {
        Some(hidden) if !hidden.is_empty() => {
            format!("{prompt}\n\n[Context for the assistant, not shown to the user: {hidden}]")
        }
        _ => prompt.to_string(),
    }
}

pub fn title_instruction(language: &str) -> String {
    let language = language.trim();
    let language = if language.is_empty() { "en" } else { language };
    format!(
        "Summarize the user's message as a conversation title of at most five words \
         in the language with code '{language}'. Output only the title, no quotes."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_persona_used_without_override() {
        let preamble = compose_preamble(&GenerationOptions::default(), &[]);
        assert!(preamble.starts_with(DEFAULT_PERSONA));
    }

    #[test]
    fn options_are_folded_in_order() {
        let options = GenerationOptions {
            translation_id: Some("KJV".to_string()),
            language: "es".to_string(),
            display_name: Some("Ana".to_string()),
            persona_override: Some("You are Moses.".to_string()),
        };

        let preamble = compose_preamble(&options, &["Keep it short.".to_string()]);
        let parts = preamble.split("\n\n").collect::<Vec<_>>();

        assert_eq!(parts[0], "You are Moses.");
        assert!(parts[1].contains("KJV"));
        assert!(parts[2].contains("'es'"));
        assert!(parts[3].contains("Ana"));
        assert_eq!(parts[4], "Keep it short.");
    }

    #[test]
    fn blank_hidden_context_leaves_prompt_untouched() {
        assert_eq!(compose_prompt("Pray with me", Some("  ")), "Pray with me");
        assert_eq!(compose_prompt("Pray with me", None), "Pray with me");
    }

    #[test]
    fn hidden_context_is_appended() {
        let composed = compose_prompt("Pray with me", Some("topic: anxiety"));
        assert!(composed.starts_with("Pray with me"));
        assert!(composed.contains("topic: anxiety"));
    }

    #[test]
    fn title_instruction_defaults_to_english() {
        assert!(title_instruction(" ").contains("'en'"));
        assert!(title_instruction("pt").contains("'pt'"));
    }
}
