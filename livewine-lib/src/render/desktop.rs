//! freedesktop.org desktop entries

use std::fmt;

/// A `Type=Application` desktop entry
#[derive(Debug, Clone)]
pub struct DesktopEntry {
    name: String,
    comment: Option<String>,
    exec: Vec<String>,
    icon: Option<String>,
    wm_class: Option<String>,
    categories: Vec<String>,
    working_dir: Option<String>,
}

impl DesktopEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            exec: Vec::new(),
            icon: None,
            wm_class: None,
            categories: Vec::new(),
            working_dir: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Command line, one element per argument; quoting is applied on render
    pub fn exec<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Window class hint so the running window groups with the launcher
    pub fn wm_class(mut self, class: impl Into<String>) -> Self {
        self.wm_class = Some(class.into());
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Quote one Exec argument following the freedesktop.org Exec key rules
fn quote_arg(arg: &str) -> String {
    const RESERVED: &[char] = &[
        ' ', '\t', '\n', '"', '\'', '\\', '>', '<', '~', '|', '&', ';', '$', '*', '?', '#', '(',
        ')', '`',
    ];
    if !arg.is_empty() && !arg.contains(RESERVED) {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '`' | '$' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    // The whole value is itself a string value, so backslashes double again
    quoted.replace('\\', "\\\\")
}

impl fmt::Display for DesktopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Desktop Entry]")?;
        writeln!(f, "Type=Application")?;
        writeln!(f, "Name={}", self.name)?;
        if let Some(ref comment) = self.comment {
            writeln!(f, "Comment={}", comment)?;
        }
        let exec: Vec<String> = self.exec.iter().map(|a| quote_arg(a)).collect();
        writeln!(f, "Exec={}", exec.join(" "))?;
        if let Some(ref dir) = self.working_dir {
            writeln!(f, "Path={}", dir)?;
        }
        if let Some(ref icon) = self.icon {
            writeln!(f, "Icon={}", icon)?;
        }
        if let Some(ref class) = self.wm_class {
            writeln!(f, "StartupWMClass={}", class)?;
        }
        if !self.categories.is_empty() {
            writeln!(f, "Categories={};", self.categories.join(";"))?;
        }
        writeln!(f, "Terminal=false")?;
        writeln!(f, "StartupNotify=true")?;
        Ok(())
    }
}
