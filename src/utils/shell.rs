/// Quote `value` for safe interpolation into a POSIX shell script
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '=' | '@'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_words_alone() {
        assert_eq!(quote("/home/dev/.nvm"), "/home/dev/.nvm");
    }

    #[test]
    fn quotes_spaces_and_single_quotes() {
        assert_eq!(quote("/home/my dir"), "'/home/my dir'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("lts/*"), "'lts/*'");
    }
}
