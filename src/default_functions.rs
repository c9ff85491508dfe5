use directories::ProjectDirs;
use std::path::PathBuf;
use tracing::debug;

pub(crate) fn default_functions_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("org", "streamsheets", "streamsheets")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("default.rhai");
    Some(path)
}

/// Load `default.rhai` from the config dir before any `-f` files, if present.
pub(crate) fn prepend_default_functions_if_present(
    functions: &mut Vec<PathBuf>,
    no_default_functions: bool,
) {
    if no_default_functions {
        return;
    }
    let Some(path) = default_functions_path() else {
        return;
    };
    if path.is_file() {
        debug!(path = %path.display(), "using default functions");
        functions.insert(0, path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_functions_path_is_deterministic() {
        assert_eq!(default_functions_path(), default_functions_path());
    }

    #[test]
    fn disabled_defaults_leave_list_untouched() {
        let mut functions = vec![PathBuf::from("mine.rhai")];
        prepend_default_functions_if_present(&mut functions, true);
        assert_eq!(functions, vec![PathBuf::from("mine.rhai")]);
    }
}
