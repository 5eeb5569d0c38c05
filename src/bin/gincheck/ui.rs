use nu_ansi_term::{Color, Style};
use std::fmt::Display;
use std::io::IsTerminal;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Theme {
    Auto,
    Plain,
}

pub struct Ui {
    palette: Palette,
    paint: bool,
}

impl Ui {
    pub fn new(theme: Theme) -> Self {
        let paint = theme == Theme::Auto && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self {
            palette: Palette::dark(),
            paint,
        }
    }

    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(String, String)> = rows
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in rows {
            if self.paint {
                println!(
                    "  {} {}",
                    self.palette.key.paint(format!("{key:>key_width$}:")),
                    self.palette.value.paint(value)
                );
            } else {
                println!("  {key:>key_width$}: {value}");
            }
        }
    }

    pub fn list<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let entries: Vec<String> = entries.into_iter().collect();
        if entries.is_empty() {
            return;
        }
        self.heading(title);
        for entry in entries {
            if self.paint {
                println!("  {} {entry}", self.palette.bullet.paint("•"));
            } else {
                println!("  - {entry}");
            }
        }
    }

    pub fn success(&self, message: &str) {
        println!("{} {message}", self.prefix(&self.palette.success, SUCCESS_ICON));
    }

    pub fn warn(&self, message: &str) {
        println!("{} {message}", self.prefix(&self.palette.warn, WARNING_ICON));
    }

    pub fn error(&self, message: &str) {
        println!("{} {message}", self.prefix(&self.palette.error, ERROR_ICON));
    }

    fn prefix(&self, style: &Style, icon: &'static str) -> String {
        if self.paint {
            style.paint(icon).to_string()
        } else {
            icon.to_string()
        }
    }

    fn heading(&self, title: &str) {
        let formatted = format!("{HEADING_ICON} {title}");
        if self.paint {
            println!("{}", self.palette.heading.paint(formatted));
        } else {
            println!("{formatted}");
        }
    }
}

struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    bullet: Style,
    success: Style,
    warn: Style,
    error: Style,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            value: Style::new().fg(Color::White),
            bullet: Style::new().fg(Color::LightBlue),
            success: Style::new().fg(Color::LightGreen).bold(),
            warn: Style::new().fg(Color::Yellow).bold(),
            error: Style::new().fg(Color::LightRed).bold(),
        }
    }
}

const HEADING_ICON: &str = "▸";
const SUCCESS_ICON: &str = "✔";
const WARNING_ICON: &str = "⚠";
const ERROR_ICON: &str = "✖";
