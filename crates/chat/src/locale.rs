/// Localized strings the controller needs.
pub trait Localizer: Send + Sync {
    /// Title given to sessions that have not been summarised.
    fn default_title(&self, language: &str) -> String;
    /// Opening model message for a fresh session.
    fn welcome_message(&self, language: &str, display_name: Option<&str>) -> String;
}

struct Strings {
    default_title: &'static str,
    guest: &'static str,
    welcome: &'static str,
}

const ENGLISH: Strings = Strings {
    default_title: "New Chat",
    guest: "Guest",
    welcome: "Welcome, {name}",
};

const SPANISH: Strings = Strings {
    default_title: "Nuevo chat",
    guest: "Invitado",
    welcome: "Bienvenido, {name}",
};

const PORTUGUESE: Strings = Strings {
    default_title: "Nova conversa",
    guest: "Visitante",
    welcome: "Bem-vindo, {name}",
};

const FRENCH: Strings = Strings {
    default_title: "Nouvelle discussion",
    guest: "Invité",
    welcome: "Bienvenue, {name}",
};

const GERMAN: Strings = Strings {
    default_title: "Neuer Chat",
    guest: "Gast",
    welcome: "Willkommen, {name}",
};

/// Compiled-in table for the supported languages. Unknown codes fall back to English.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLocalizer;

impl BuiltinLocalizer {
    fn strings(language: &str) -> &'static Strings {
        // "pt-BR" and "pt_BR" resolve the same as "pt".
        let primary = language
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match primary.as_str() {
            "es" => &SPANISH,
            "pt" => &PORTUGUESE,
            "fr" => &FRENCH,
            "de" => &GERMAN,
            _ => &ENGLISH,
        }
    }
}

impl Localizer for BuiltinLocalizer {
    fn default_title(&self, language: &str) -> String {
        Self::strings(language).default_title.to_string()
    }

    fn welcome_message(&self, language: &str, display_name: Option<&str>) -> String {
        let strings = Self::strings(language);
        let name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(strings.guest);
        strings.welcome.replace("{name}", name)
    }
}
