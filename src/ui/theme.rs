use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Styles for CLI output. Plain when stdout is not a terminal or colors are
/// disabled through `NO_COLOR` / `CLICOLOR`.
#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    pub info: Style,
    pub dim: Style,
    pub muted: Style,
}

impl Theme {
    pub fn detect() -> Self {
        Self::styled(console::Term::stdout().is_term() && console::colors_enabled())
    }

    pub fn styled(colors: bool) -> Self {
        let pick = |style: Style| if colors { style } else { Style::new() };
        Self {
            header: pick(Style::new().blue().bold()),
            success: pick(Style::new().green()),
            error: pick(Style::new().red().bold()),
            warn: pick(Style::new().yellow()),
            info: pick(Style::new().cyan()),
            dim: pick(Style::new().dimmed()),
            muted: pick(Style::new().bright_black().italic()),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use owo_colors::OwoColorize;

    #[test]
    fn test_uncolored_theme_leaves_text_alone() {
        let theme = Theme::styled(false);
        assert_eq!("snapshot".style(theme.header).to_string(), "snapshot");
        assert_eq!("absent".style(theme.muted).to_string(), "absent");
    }

    #[test]
    fn test_colored_theme_emits_escapes() {
        let theme = Theme::styled(true);
        assert!("ready".style(theme.success).to_string().contains('\u{1b}'));
    }
}
