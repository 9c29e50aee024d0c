//! Best-effort patient name from the header text.

/// Lines containing any of these (case-insensitive) are report boilerplate,
/// never the patient name.
const BLACKLIST: &[&str] = &[
    "report date",
    "biometria",
    "cálculo iol",
    "page",
    "id:",
    "dob:",
    "gender:",
    "r. ",
    "av. ",
    "rua ",
    "tel",
    "cep",
    "http",
    "www",
    "e-mail",
    "email",
    "printing images",
    "admin/",
    "instituto",
    "hospital",
];

const MIN_LEN: usize = 2;
const MAX_LEN: usize = 80;

/// Returns the first header line that looks like a person's name, or an
/// empty string when none does.
pub fn detect_patient_name(header_text: &str) -> String {
    header_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_blacklisted(line))
        .map(clean_line)
        .find(|candidate| looks_like_name(candidate))
        .unwrap_or_default()
}

fn is_blacklisted(line: &str) -> bool {
    let lower = line.to_lowercase();
    BLACKLIST.iter().any(|term| lower.contains(term))
}

/// Keeps Latin letters (Latin-1 accented included), apostrophes, hyphens,
/// periods and spaces. Inner spacing is left as is.
fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|&c| is_name_char(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || matches!(c, '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{FF}')
        || matches!(c, '\'' | '-' | '.' | ' ')
}

fn looks_like_name(candidate: &str) -> bool {
    let len = candidate.chars().count();
    candidate.split_whitespace().count() >= 2 && (MIN_LEN..=MAX_LEN).contains(&len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_boilerplate_lines() {
        let header = "Instituto de Olhos São Lucas\n\
                      Biometria Óptica IOLMaster 700\n\
                      Report date: 12/03/2024\n\
                      MARIA DA SILVA\n\
                      ID: 000123  DOB: 01/02/1950";
        assert_eq!(detect_patient_name(header), "MARIA DA SILVA");
    }

    #[test]
    fn test_strips_digits_and_symbols() {
        let header = "  João D'Ávila-Souza, 72  \n";
        assert_eq!(detect_patient_name(header), "João D'Ávila-Souza");
    }

    #[test]
    fn test_inner_spacing_is_kept() {
        assert_eq!(detect_patient_name("Ana  Maria   Lopes\n"), "Ana  Maria   Lopes");
    }

    #[test]
    fn test_non_latin_letters_are_stripped() {
        // Only the Latin words survive, one word is not a name
        assert_eq!(detect_patient_name("Иван Petrov"), "");
        assert_eq!(detect_patient_name("Иван Petrov Silva"), "Petrov Silva");
        assert_eq!(detect_patient_name("Zoë × Müller"), "Zoë  Müller");
    }

    #[test]
    fn test_single_word_is_not_a_name() {
        assert_eq!(detect_patient_name("Paciente:\nSMITH\n1234"), "");
    }

    #[test]
    fn test_blacklist_is_case_insensitive() {
        let header = "HOSPITAL DAS CLINICAS\nPage 1 of 2\nJohn Smith";
        assert_eq!(detect_patient_name(header), "John Smith");
    }

    #[test]
    fn test_overlong_line_rejected() {
        let long = "Ab ".repeat(40);
        assert_eq!(detect_patient_name(&long), "");
    }

    #[test]
    fn test_empty_header() {
        assert_eq!(detect_patient_name(""), "");
        assert_eq!(detect_patient_name("\n  \n"), "");
    }
}
