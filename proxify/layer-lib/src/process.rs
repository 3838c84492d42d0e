//! Launching processes with the layer loaded.
//!
//! Both the launcher and the `CreateProcessW` intercept create the child suspended, inject the
//! layer DLL, then let it run.

#[cfg(target_os = "windows")]
pub mod windows;

/// `CREATE_SUSPENDED` from `winbase.h`.
pub const CREATE_SUSPENDED: u32 = 0x0000_0004;

/// Environment variable holding the path of the layer DLL, read by the launcher.
pub const PROXIFY_LAYER_FILE_ENV: &str = "PROXIFY_LAYER_FILE";

/// How to create a child that gets the layer injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLaunch {
    /// Flags passed to the real process creation call.
    pub creation_flags: u32,

    /// Whether the main thread is resumed after injection. `false` when the caller itself asked
    /// for a suspended child.
    pub resume: bool,
}

impl ChildLaunch {
    pub fn plan(caller_flags: u32) -> Self {
        Self {
            creation_flags: caller_flags | CREATE_SUSPENDED,
            resume: caller_flags & CREATE_SUSPENDED == 0,
        }
    }
}

/// Quotes `arg` following the `CommandLineToArgvW` rules.
pub fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\u{b}', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');

    let mut backslashes = 0;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                // Escape the run of backslashes and the quote itself.
                quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat_n('\\', backslashes));
                quoted.push(ch);
                backslashes = 0;
            }
        }
    }

    // Backslashes before the closing quote.
    quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
    quoted.push('"');

    quoted
}

/// Joins `program` and `args` into a single command line.
pub fn build_command_line<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    std::iter::once(quote_arg(program))
        .chain(args.into_iter().map(|arg| quote_arg(arg.as_ref())))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0x4, true)]
    #[case(0x10, 0x14, true)]
    #[case(0x4, 0x4, false)]
    #[case(0x400 | 0x4, 0x404, false)]
    fn launch_plan(#[case] caller: u32, #[case] flags: u32, #[case] resume: bool) {
        assert_eq!(
            ChildLaunch::plan(caller),
            ChildLaunch {
                creation_flags: flags,
                resume
            }
        );
    }

    #[rstest]
    #[case("curl.exe", "curl.exe")]
    #[case("", r#""""#)]
    #[case("C:\\Program Files\\app.exe", r#""C:\Program Files\app.exe""#)]
    #[case(r#"say "hi""#, r#""say \"hi\"""#)]
    #[case(r"C:\dir with space\", r#""C:\dir with space\\""#)]
    #[case(r"no\space\path", r"no\space\path")]
    fn quoting(#[case] arg: &str, #[case] expected: &str) {
        assert_eq!(quote_arg(arg), expected);
    }

    #[rstest]
    fn command_line() {
        assert_eq!(
            build_command_line("curl.exe", ["-x", "", "https://example.com"]),
            r#"curl.exe -x "" https://example.com"#
        );
    }
}
