//! Field extraction from the first page of a diploma
//!
//! The first page carries the holder's name, the issuing institution, the
//! qualification and the specialty code. OCR output keeps the printed labels
//! (`Фамилия`, `Имя`, `Квалификация`, ...), so every field is located by its
//! label or by the shape of its value.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::db::DiplomaRecord;

lazy_static! {
    static ref HORIZONTAL_SPACE: Regex = Regex::new(r"[ \t]+").unwrap();
    static ref BLANK_LINES: Regex = Regex::new(r"\n\s*\n").unwrap();
    static ref ANY_SPACE: Regex = Regex::new(r"\s+").unwrap();

    static ref SURNAME: Regex =
        Regex::new(r"Фамилия\s*[:\-]?\s*([А-ЯЁа-яё][А-ЯЁа-яё\-]+)").unwrap();
    static ref FIRST_NAME: Regex =
        Regex::new(r"\bИмя\s*[:\-]?\s*([А-ЯЁа-яё][А-ЯЁа-яё\-]+)").unwrap();
    static ref PATRONYMIC: Regex = Regex::new(
        r"Отчество\s*(?:\(при\s+наличии\))?\s*[:\-]?\s*([А-ЯЁа-яё][А-ЯЁа-яё\-]+)"
    ).unwrap();

    static ref QUALIFICATION: Regex =
        Regex::new(r"Квалификация\s*[:\-]?\s+([А-ЯЁа-яё][А-ЯЁа-яё\s\-]+)").unwrap();
    static ref TRAILING_PO: Regex = Regex::new(r"\s+по\s*$").unwrap();

    /// Institution block between the state header and the name fields
    static ref HEADER_BLOCK: Regex = Regex::new(
        r"(?is)(?:РОССИЙСКАЯ\s*\n?\s*ФЕДЕРАЦИЯ|РОССИЙСКАЯ ФЕДЕРАЦИЯ)\s*\n(.*?)\n\s*(?:Имя|Отчество)\b"
    ).unwrap();
    static ref ORG_FORM: Regex = Regex::new(
        r"(?i)((?:Автономная|Федеральное|Государственное|Частное|Негосударственное)\s+(?:некоммерческая|государственное|бюджетное)\s+(?:организация|учреждение|образовательное)[\s\S]*?(?:г\.?\s*о?\.?\s*[\w\-]+|$))"
    ).unwrap();
    static ref EDU_NAME: Regex = Regex::new(
        r"(?i)([\w\s\-]*?(?:университет|колледж|институт|техникум|академия|училище)[\s\S]*?(?:г\.?\s*о?\.?\s*[\w\-]+|$))"
    ).unwrap();
    static ref STATE_HEADER: Regex = Regex::new(r"(?i)^РОССИЙСКАЯ\s+ФЕДЕРАЦИЯ\s*").unwrap();
    static ref TRAILING_SURNAME: Regex = Regex::new(r"(?i)\s*Фамилия\s.*$").unwrap();
    static ref TRAILING_FIRST_NAME: Regex = Regex::new(r"(?i)\s*Имя\s.*$").unwrap();

    static ref SPECIALTY_LABELLED: Regex = Regex::new(
        r"(?i)специальност[ьи]\s*[:\-]?\s*\n?\s*(\d{2}\.\d{2}\.\d{2}\s+[А-ЯЁа-яё][\w\s\-\(\)]+)"
    ).unwrap();
    static ref SPECIALTY_CODE: Regex =
        Regex::new(r"(\d{2}\.\d{2}\.\d{2}\s+[А-ЯЁа-яё][\w\s\-\(\)]+)").unwrap();
}

/// Words that mark a line as part of an institution name
const EDU_KEYWORDS: &[&str] = &[
    "университет",
    "колледж",
    "институт",
    "техникум",
    "академия",
    "образовательное учреждение",
    "образовательная организация",
    "профессионального образования",
    "высшего образования",
    "среднего профессионального",
    "образования",
    "организация профессионального",
    "некоммерческая организация",
    "бюджетное образовательное",
    "автономная некоммерческая",
    "федеральное государственное",
    "училище",
];

/// Labels of other fields; an institution block ends at the first of them
const FIELD_LABELS: &[&str] = &[
    "фамилия",
    "имя",
    "отчество",
    "дата рождения",
    "сведения о",
    "квалификация",
    "специальност",
    "регистрационный",
    "приложение",
    "дата выдачи",
    "предыдущий документ",
    "аттестат",
    "срок освоения",
    "российская федерация",
];

/// Fields recovered from a first page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDiploma {
    pub full_name: Option<String>,
    /// Qualification awarded, e.g. `Техник`
    pub direction: Option<String>,
    pub university: Option<String>,
    /// Specialty code and title, e.g. `09.02.01 Компьютерные системы`
    pub specialization: Option<String>,
    #[serde(skip)]
    pub errors: Vec<String>,
}

impl ParsedDiploma {
    pub fn is_valid(&self) -> bool {
        self.full_name.is_some()
            && self.direction.is_some()
            && self.university.is_some()
            && self.specialization.is_some()
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.full_name.is_none() {
            missing.push("full name");
        }
        if self.direction.is_none() {
            missing.push("qualification");
        }
        if self.university.is_none() {
            missing.push("institution");
        }
        if self.specialization.is_none() {
            missing.push("specialty");
        }
        missing
    }

    /// The database record, once every field is known
    pub fn to_record(&self) -> Option<DiplomaRecord> {
        Some(DiplomaRecord {
            full_name: self.full_name.clone()?,
            direction: self.direction.clone()?,
            university: self.university.clone()?,
            specialization: self.specialization.clone()?,
        })
    }
}

fn normalize_whitespace(text: &str) -> String {
    let text = HORIZONTAL_SPACE.replace_all(text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Surname and first name are required, the patronymic is optional
pub fn parse_full_name(text: &str) -> Option<String> {
    let surname = capture(&SURNAME, text);
    let first_name = capture(&FIRST_NAME, text);
    let patronymic = capture(&PATRONYMIC, text);

    match (surname, first_name) {
        (Some(surname), Some(first_name)) => {
            let mut parts = vec![surname, first_name];
            parts.extend(patronymic);
            Some(parts.join(" "))
        }
        _ => None,
    }
}

/// Qualification on the label's line or the next one, without a trailing `по`
pub fn parse_direction(text: &str) -> Option<String> {
    let raw = capture(&QUALIFICATION, text)?;
    let first_line = raw.lines().next().unwrap_or_default().trim();
    let direction = TRAILING_PO.replace(first_line, "").trim().to_string();
    (!direction.is_empty()).then_some(direction)
}

fn has_edu_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    EDU_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Institution name, tried in order: the block under the state header,
/// consecutive lines containing an institution keyword, then a free match
pub fn parse_university(text: &str) -> Option<String> {
    if let Some(block) = capture(&HEADER_BLOCK, text) {
        if has_edu_keyword(&block) && block.chars().count() > 10 {
            if let Some(name) = clean_university_name(&block) {
                return Some(name);
            }
        }
    }

    let mut block_lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !block_lines.is_empty() {
                break;
            }
            continue;
        }

        let lower = line.to_lowercase();
        if FIELD_LABELS.iter().any(|label| lower.contains(label)) {
            if !block_lines.is_empty() {
                break;
            }
            continue;
        }

        if !block_lines.is_empty() || EDU_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            block_lines.push(line);
        }
    }
    if !block_lines.is_empty() {
        if let Some(name) = clean_university_name(&block_lines.join(" ")) {
            return Some(name);
        }
    }

    [&*ORG_FORM, &*EDU_NAME].into_iter().find_map(|re| {
        let candidate = capture(re, text)?;
        clean_university_name(&candidate).filter(|name| name.chars().count() > 10)
    })
}

fn clean_university_name(raw: &str) -> Option<String> {
    let name = ANY_SPACE.replace_all(raw, " ");
    let name = name.trim_matches(|c: char| " \t\n\r.,;:".contains(c));
    let name = STATE_HEADER.replace(name, "");
    let name = TRAILING_SURNAME.replace(name.trim(), "");
    let name = TRAILING_FIRST_NAME.replace(name.trim(), "");
    let name = name.trim();

    (name.chars().count() >= 5).then(|| name.to_string())
}

/// Specialty code `NN.NN.NN` with its title, preferably after the label
pub fn parse_specialization(text: &str) -> Option<String> {
    let raw = capture(&SPECIALTY_LABELLED, text).or_else(|| capture(&SPECIALTY_CODE, text))?;
    raw.lines().next().map(|line| line.trim().to_string())
}

/// Extract every field from the OCR text of a first page
pub fn parse_first_page(ocr_text: &str) -> ParsedDiploma {
    let mut parsed = ParsedDiploma::default();
    if ocr_text.trim().is_empty() {
        parsed.errors.push("OCR text is empty".to_string());
        return parsed;
    }

    let text = normalize_whitespace(ocr_text);
    tracing::debug!("Parsing first page ({} chars)", text.chars().count());

    parsed.full_name = parse_full_name(&text);
    parsed.direction = parse_direction(&text);
    parsed.university = parse_university(&text);
    parsed.specialization = parse_specialization(&text);

    for field in parsed.missing_fields() {
        parsed.errors.push(format!("Could not find the {}", field));
    }

    if parsed.is_valid() {
        tracing::info!(
            full_name = ?parsed.full_name,
            direction = ?parsed.direction,
            university = ?parsed.university,
            specialization = ?parsed.specialization,
            "All fields parsed"
        );
    } else {
        tracing::warn!("Missing fields: {}", parsed.missing_fields().join(", "));
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLEGE_DIPLOMA: &str = "РОССИЙСКАЯ ФЕДЕРАЦИЯ\n\
        Государственное бюджетное профессиональное образовательное учреждение\n\
        города Москвы «Московский колледж связи»\n\
        Фамилия   Иванов\n\
        Имя Иван\n\
        Отчество (при наличии) Иванович\n\
        \n\
        Квалификация\n\
        Техник по\n\
        специальности\n\
        09.02.01 Компьютерные системы и комплексы";

    const ACADEMY_DIPLOMA: &str = "Фамилия\n\
        Петрова\n\
        Имя\n\
        Анна\n\
        Академия права и управления\n\
        Квалификация: Юрист\n\
        38.02.01 Экономика и бухгалтерский учет (по отраслям)";

    #[test]
    fn test_parses_college_diploma() {
        let parsed = parse_first_page(COLLEGE_DIPLOMA);

        assert_eq!(parsed.full_name.as_deref(), Some("Иванов Иван Иванович"));
        assert_eq!(parsed.direction.as_deref(), Some("Техник"));
        assert_eq!(
            parsed.university.as_deref(),
            Some("Государственное бюджетное профессиональное образовательное учреждение города Москвы «Московский колледж связи»")
        );
        assert_eq!(
            parsed.specialization.as_deref(),
            Some("09.02.01 Компьютерные системы и комплексы")
        );
        assert!(parsed.is_valid());
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.to_record().unwrap().full_name, "Иванов Иван Иванович");
    }

    #[test]
    fn test_parses_labels_on_their_own_lines() {
        let parsed = parse_first_page(ACADEMY_DIPLOMA);

        assert_eq!(parsed.full_name.as_deref(), Some("Петрова Анна"));
        assert_eq!(parsed.direction.as_deref(), Some("Юрист"));
        assert_eq!(parsed.university.as_deref(), Some("Академия права и управления"));
        assert_eq!(
            parsed.specialization.as_deref(),
            Some("38.02.01 Экономика и бухгалтерский учет (по отраслям)")
        );
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let parsed = parse_first_page("Диплом\nбез полей");

        assert!(!parsed.is_valid());
        assert_eq!(
            parsed.missing_fields(),
            vec!["full name", "qualification", "institution", "specialty"]
        );
        assert_eq!(parsed.errors.len(), 4);
        assert!(parsed.to_record().is_none());
    }

    #[test]
    fn test_empty_text() {
        let parsed = parse_first_page("  \n ");
        assert_eq!(parsed.errors, vec!["OCR text is empty".to_string()]);
        assert_eq!(parsed.missing_fields().len(), 4);
    }

    #[test]
    fn test_name_labels_without_space_after_colon() {
        assert_eq!(
            parse_full_name("Фамилия:Иванов\nИмя:Иван\nОтчество:Иванович"),
            Some("Иванов Иван Иванович".to_string())
        );
        assert_eq!(
            parse_full_name("Фамилия - Петрова\nИмя-Анна"),
            Some("Петрова Анна".to_string())
        );
    }

    #[test]
    fn test_surname_without_first_name_is_not_a_name() {
        assert_eq!(parse_full_name("Фамилия Сидоров"), None);
    }

    #[test]
    fn test_clean_university_name() {
        assert_eq!(
            clean_university_name("РОССИЙСКАЯ ФЕДЕРАЦИЯ Колледж\nсвязи."),
            Some("Колледж связи".to_string())
        );
        assert_eq!(
            clean_university_name("Уральский институт Фамилия Смирнов"),
            Some("Уральский институт".to_string())
        );
        assert_eq!(clean_university_name("Вуз"), None);
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \t b\n \n\n c "), "a b\n\n c");
        assert_eq!(normalize_whitespace("a\n\n\n\nb"), "a\n\nb");
    }
}
