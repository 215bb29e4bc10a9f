//! Compiler command-line arguments relevant to parsing headers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;

/// Language standard assumed when no `-std=` flag is given
const DEFAULT_CPLUSPLUS: &str = "201703L";

/// The subset of a compiler invocation that influences what the parser sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerArguments {
    /// `-I` / `/I` directories, in command-line order
    pub include_dirs: Vec<PathBuf>,

    /// `-isystem` directories; headers found here are never library headers
    pub system_include_dirs: Vec<PathBuf>,

    /// `-D` macros (name → replacement text)
    pub defines: BTreeMap<String, String>,

    /// `-U` macros
    pub undefines: Vec<String>,

    /// `-std=` value, e.g. `c++17`
    pub standard: Option<String>,

    /// Arguments that do not influence parsing
    pub ignored: Vec<String>,
}

impl CompilerArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of arguments. Relative include directories are kept as written.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigurationError> {
        Self::parse_impl(args, None)
    }

    /// Parse a list of arguments, resolving relative include directories against `base`.
    pub fn parse_relative<S: AsRef<str>>(args: &[S], base: &Path) -> Result<Self, ConfigurationError> {
        Self::parse_impl(args, Some(base))
    }

    fn parse_impl<S: AsRef<str>>(args: &[S], base: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut parsed = Self::default();
        let mut iter = args.iter().map(AsRef::as_ref);

        while let Some(arg) = iter.next() {
            if arg.trim().is_empty() {
                return Err(malformed(arg, "empty argument"));
            }

            if let Some((flag, inline)) = split_flag(arg, &["-isystem", "-I", "/I", "-D", "/D", "-U", "-x"]) {
                let value = match inline {
                    Some(value) => value.to_string(),
                    None => iter
                        .next()
                        .filter(|v| !v.trim().is_empty())
                        .ok_or_else(|| malformed(arg, "missing value"))?
                        .to_string(),
                };

                match flag {
                    "-I" | "/I" => parsed.include_dirs.push(resolve(&value, base)),
                    "-isystem" => parsed.system_include_dirs.push(resolve(&value, base)),
                    "-D" | "/D" => {
                        let (name, replacement) = match value.split_once('=') {
                            Some((name, replacement)) => (name, replacement),
                            None => (value.as_str(), "1"),
                        };
                        if name.is_empty() {
                            return Err(malformed(arg, "missing macro name"));
                        }
                        parsed.undefines.retain(|u| u != name);
                        parsed.defines.insert(name.to_string(), replacement.to_string());
                    }
                    "-U" => {
                        parsed.defines.remove(&value);
                        parsed.undefines.push(value);
                    }
                    _ => {
                        if value != "c++" && value != "c++-header" {
                            return Err(malformed(arg, &format!("unsupported language '{value}'")));
                        }
                    }
                }
                continue;
            }

            if let Some(standard) = arg.strip_prefix("-std=").or_else(|| arg.strip_prefix("/std:")) {
                let standard = standard.to_ascii_lowercase();
                if !(standard.starts_with("c++") || standard.starts_with("gnu++")) {
                    return Err(malformed(arg, "not a C++ language standard"));
                }
                parsed.standard = Some(standard);
                continue;
            }

            parsed.ignored.push(arg.to_string());
        }

        Ok(parsed)
    }

    /// Append `other`; later defines override earlier ones.
    pub fn merge(&mut self, other: &CompilerArguments) {
        for dir in &other.include_dirs {
            if !self.include_dirs.contains(dir) {
                self.include_dirs.push(dir.clone());
            }
        }
        for dir in &other.system_include_dirs {
            if !self.system_include_dirs.contains(dir) {
                self.system_include_dirs.push(dir.clone());
            }
        }
        for name in &other.undefines {
            self.defines.remove(name);
            if !self.undefines.contains(name) {
                self.undefines.push(name.clone());
            }
        }
        for (name, value) in &other.defines {
            self.undefines.retain(|u| u != name);
            self.defines.insert(name.clone(), value.clone());
        }
        if other.standard.is_some() {
            self.standard = other.standard.clone();
        }
        self.ignored.extend(other.ignored.iter().cloned());
    }

    /// Value of `__cplusplus` implied by the language standard.
    pub fn cplusplus_value(&self) -> &'static str {
        let Some(standard) = &self.standard else {
            return DEFAULT_CPLUSPLUS;
        };
        let version = standard
            .trim_start_matches("gnu++")
            .trim_start_matches("c++");
        match version {
            "98" | "03" => "199711L",
            "11" | "0x" => "201103L",
            "14" | "1y" => "201402L",
            "17" | "1z" => "201703L",
            "20" | "2a" => "202002L",
            "23" | "2b" | "latest" => "202302L",
            _ => DEFAULT_CPLUSPLUS,
        }
    }

    /// Macros visible before the first line of every translation unit.
    pub fn predefined_macros(&self) -> BTreeMap<String, String> {
        let mut macros = BTreeMap::new();
        macros.insert("__cplusplus".to_string(), self.cplusplus_value().to_string());
        for (name, value) in &self.defines {
            macros.insert(name.clone(), value.clone());
        }
        for name in &self.undefines {
            macros.remove(name);
        }
        macros
    }
}

/// Split a shell-style command line (as found in a compilation database `command`
/// entry) into arguments. Handles single and double quotes and backslash escapes.
pub fn split_command_line(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_arg = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_arg = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

/// Match `arg` against flags that take a value either attached (`-Ifoo`) or as the next
/// argument (`-I foo`). Longer flags must come first in `flags`.
///
/// MSVC-style flags only match when the attached value has no `/`, so absolute Unix
/// paths such as `/Data/a.cpp` are not mistaken for `/D`.
fn split_flag<'a>(arg: &'a str, flags: &[&'static str]) -> Option<(&'static str, Option<&'a str>)> {
    for &flag in flags {
        if let Some(rest) = arg.strip_prefix(flag) {
            if flag.starts_with('/') && rest.contains('/') {
                continue;
            }
            return Some((flag, (!rest.is_empty()).then_some(rest)));
        }
    }
    None
}

fn resolve(value: &str, base: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(value);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

fn malformed(argument: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::MalformedArgument {
        argument: argument.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_include_forms() {
        let args = CompilerArguments::parse(&["-Iinc", "-I", "third_party", "/Iwin", "-isystem", "/usr/include"])
            .unwrap();
        assert_eq!(
            args.include_dirs,
            vec![PathBuf::from("inc"), PathBuf::from("third_party"), PathBuf::from("win")]
        );
        assert_eq!(args.system_include_dirs, vec![PathBuf::from("/usr/include")]);
    }

    #[test]
    fn test_parse_relative() {
        let args = CompilerArguments::parse_relative(&["-Iinc", "-I/abs"], Path::new("/work")).unwrap();
        assert_eq!(
            args.include_dirs,
            vec![PathBuf::from("/work/inc"), PathBuf::from("/abs")]
        );
    }

    #[test]
    fn test_parse_defines() {
        let args = CompilerArguments::parse(&["-DFOO", "-DBAR=2", "/DWIN32", "-D", "X=y", "-UFOO"]).unwrap();
        assert_eq!(args.defines.get("BAR").map(String::as_str), Some("2"));
        assert_eq!(args.defines.get("WIN32").map(String::as_str), Some("1"));
        assert_eq!(args.defines.get("X").map(String::as_str), Some("y"));
        assert!(!args.defines.contains_key("FOO"));
        assert_eq!(args.undefines, vec!["FOO".to_string()]);
    }

    #[test]
    fn test_parse_standard() {
        let args = CompilerArguments::parse(&["-std=c++20", "-Wall", "-O2"]).unwrap();
        assert_eq!(args.standard.as_deref(), Some("c++20"));
        assert_eq!(args.cplusplus_value(), "202002L");
        assert_eq!(args.ignored, vec!["-Wall".to_string(), "-O2".to_string()]);

        let args = CompilerArguments::parse(&["/std:c++14"]).unwrap();
        assert_eq!(args.cplusplus_value(), "201402L");
        assert_eq!(CompilerArguments::new().cplusplus_value(), "201703L");
    }

    #[test]
    fn test_malformed_arguments() {
        assert!(matches!(
            CompilerArguments::parse(&["-I"]),
            Err(ConfigurationError::MalformedArgument { .. })
        ));
        assert!(CompilerArguments::parse(&[""]).is_err());
        assert!(CompilerArguments::parse(&["-std=c11"]).is_err());
        assert!(CompilerArguments::parse(&["-x", "c"]).is_err());
        assert!(CompilerArguments::parse(&["-D=1"]).is_err());
        assert!(CompilerArguments::parse(&["-x", "c++"]).is_ok());
        // Unix paths are not MSVC switches
        let args = CompilerArguments::parse(&["/Data/src/a.cpp"]).unwrap();
        assert!(args.defines.is_empty());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = CompilerArguments::parse(&["-Iinc", "-DMODE=1", "-std=c++14"]).unwrap();
        let extra = CompilerArguments::parse(&["-Iinc", "-Iextra", "-DMODE=2", "-std=c++17"]).unwrap();
        base.merge(&extra);

        assert_eq!(base.include_dirs, vec![PathBuf::from("inc"), PathBuf::from("extra")]);
        assert_eq!(base.defines.get("MODE").map(String::as_str), Some("2"));
        assert_eq!(base.standard.as_deref(), Some("c++17"));
    }

    #[test]
    fn test_predefined_macros() {
        let args = CompilerArguments::parse(&["-DAPI_EXPORTS", "-std=c++11"]).unwrap();
        let macros = args.predefined_macros();
        assert_eq!(macros.get("__cplusplus").map(String::as_str), Some("201103L"));
        assert!(macros.contains_key("API_EXPORTS"));
    }

    #[test]
    fn test_split_command_line() {
        let args = split_command_line(r#"/usr/bin/c++ -I"my dir" -DNAME='a b' -c  src/a.cpp"#);
        assert_eq!(
            args,
            vec!["/usr/bin/c++", "-Imy dir", "-DNAME=a b", "-c", "src/a.cpp"]
        );
        assert!(split_command_line("   ").is_empty());
    }
}
