use lazy_static::lazy_static;
use regex::Regex;

/// Locale assumed when the system locale cannot be read or carries no region.
pub const DEFAULT_LOCALE: &str = "en_US";
/// Country of [DEFAULT_LOCALE].
pub const DEFAULT_COUNTRY: &str = "US";

lazy_static! {
    static ref COUNTRY_CODE_REGEX: Regex = Regex::new(r"^[A-Za-z]{2}$").unwrap();
    // language, optional script, region, then optional encoding or modifier:
    // "en_US", "en-US", "en_US.UTF-8", "zh-Hant-TW", "sr_RS@latin"
    static ref LOCALE_REGEX: Regex =
        Regex::new(r"^[A-Za-z]{2,3}(?:[_-][A-Za-z]{4})?[_-]([A-Za-z]{2})(?:[._@-].*)?$").unwrap();
}

/// Returns true if `code` looks like an ISO 3166-1 alpha-2 code, ignoring case and surrounding
/// whitespace.
pub fn is_valid_country_code(code: &str) -> bool {
    COUNTRY_CODE_REGEX.is_match(code.trim())
}

/// Trims and upper-cases a country code, or returns None if it is not a two letter code.
pub fn normalize_country_code(code: &str) -> Option<String> {
    let code = code.trim();
    if is_valid_country_code(code) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

/// Compares two country codes ignoring case. Malformed codes never compare equal, not even to
/// themselves.
pub fn same_country(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    is_valid_country_code(a) && is_valid_country_code(b) && a.eq_ignore_ascii_case(b)
}

/// Extracts the region of a POSIX or BCP 47 locale identifier as an upper-case country code.
///
/// Locales without a region ("en", "C", "POSIX") and numeric regions ("es-419") yield None.
pub fn country_from_locale(locale: &str) -> Option<String> {
    LOCALE_REGEX
        .captures(locale.trim())
        .and_then(|captures| captures.get(1))
        .map(|region| region.as_str().to_ascii_uppercase())
}

/// Human readable name for the most common country codes. Unknown codes are returned upper-cased.
pub fn country_name(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    let name = match code.as_str() {
        "IL" => "Israel",
        "US" => "United States",
        "GB" | "UK" => "United Kingdom",
        "FR" => "France",
        "DE" => "Germany",
        "ES" => "Spain",
        "IT" => "Italy",
        "JP" => "Japan",
        "CN" => "China",
        "IN" => "India",
        "BR" => "Brazil",
        "CA" => "Canada",
        "AU" => "Australia",
        "MX" => "Mexico",
        "RU" => "Russia",
        "KR" => "South Korea",
        "AR" => "Argentina",
        "NL" => "Netherlands",
        "SE" => "Sweden",
        "NO" => "Norway",
        "DK" => "Denmark",
        "FI" => "Finland",
        "PL" => "Poland",
        "TR" => "Turkey",
        "SA" => "Saudi Arabia",
        "AE" => "United Arab Emirates",
        "EG" => "Egypt",
        "ZA" => "South Africa",
        _ => return code,
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test_case("us", Some("US"); "lower case")]
    #[test_case(" IL ", Some("IL"); "padded")]
    #[test_case("Fr", Some("FR"); "mixed case")]
    #[test_case("USA", None; "alpha-3")]
    #[test_case("", None; "empty")]
    #[test_case("1A", None; "digit")]
    #[test_case("U S", None; "inner space")]
    fn normalizes_country_codes(code: &str, expected: Option<&str>) {
        assert_that!(normalize_country_code(code)).is_equal_to(expected.map(String::from));
    }

    #[test_case("il", "IL", true; "lower and upper")]
    #[test_case("US", "us", true; "upper and lower")]
    #[test_case("US", "GB", false; "different countries")]
    #[test_case("", "", false; "empty codes")]
    #[test_case("USA", "USA", false; "malformed codes")]
    fn compares_country_codes(a: &str, b: &str, expected: bool) {
        assert_eq!(same_country(a, b), expected);
    }

    #[test_case("en_US", Some("US"); "posix")]
    #[test_case("en-US", Some("US"); "bcp47")]
    #[test_case("en_US.UTF-8", Some("US"); "posix with encoding")]
    #[test_case("he-il", Some("IL"); "lower case region")]
    #[test_case("zh-Hant-TW", Some("TW"); "with script")]
    #[test_case("sr_RS@latin", Some("RS"); "with modifier")]
    #[test_case("en", None; "language only")]
    #[test_case("C", None; "c locale")]
    #[test_case("POSIX", None; "posix locale")]
    #[test_case("es-419", None; "numeric region")]
    fn extracts_country_from_locale(locale: &str, expected: Option<&str>) {
        assert_that!(country_from_locale(locale)).is_equal_to(expected.map(String::from));
    }

    #[test]
    fn default_locale_has_default_country() {
        assert_that!(country_from_locale(DEFAULT_LOCALE))
            .contains_value(DEFAULT_COUNTRY.to_string());
    }

    #[test]
    fn names_known_and_unknown_countries() {
        assert_eq!(country_name("il"), "Israel");
        assert_eq!(country_name("UK"), "United Kingdom");
        assert_eq!(country_name("gb"), "United Kingdom");
        assert_eq!(country_name("zz"), "ZZ");
    }
}
