// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! User-configurable category taxonomy
//!
//! Grammar, one category per line:
//!
//! ```text
//! name | description | example1; example2; ...
//! ```
//!
//! Names are validated identifiers; `unknown` is the reserved fallback and is
//! always present. The taxonomy doubles as the allowed output vocabulary for
//! the model and as the weak-supervision signal for category repair.

use regex::Regex;
use std::sync::OnceLock;

/// One taxonomy category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyCategory {
    pub name: String,
    pub description: String,
    pub examples: Vec<String>,
}

/// Ordered list of categories, always containing `unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    pub categories: Vec<TaxonomyCategory>,
}

impl Taxonomy {
    pub fn allowed_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.categories.iter().any(|c| c.name == name)
    }

    /// Render the taxonomy as the prompt block sent to the model.
    pub fn to_prompt_block(&self) -> String {
        let mut lines = Vec::new();
        for c in &self.categories {
            let ex = if c.examples.is_empty() {
                String::new()
            } else {
                format!(" Examples: {}", c.examples.join("; "))
            };
            let desc = c.description.trim();
            if desc.is_empty() {
                lines.push(format!("- {}:{}", c.name, ex).trim().to_string());
            } else {
                lines.push(format!("- {}: {}{}", c.name, desc, ex).trim().to_string());
            }
        }
        lines.join("\n")
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        let (taxonomy, _errors) = parse_taxonomy_lines(DEFAULT_TAXONOMY_EN);
        taxonomy
    }
}

/// Default English taxonomy for personal documents.
pub const DEFAULT_TAXONOMY_EN: &[&str] = &[
    "house | Home, property, rent, utilities, household paperwork | rent; lease; condominium; property tax; utility bill; electricity; gas; water; internet; home insurance; maintenance",
    "purchases | Purchases and subscriptions | receipt; order confirmation; subscription; e-commerce; warranty; invoice for goods/services",
    "travel | Travel and transportation | flight; hotel; booking; ticket; itinerary; car rental; travel insurance",
    "tax | Taxes and public administration | tax return; agency letter; payment notice; municipality tax",
    "banking | Banking and payments (generic) | bank statement; transfer; card statement; account; payment receipt",
    "legal | Legal documents and compliance | contract; terms; privacy policy; legal letter; complaint; power of attorney",
    "work | Employment and professional documents | payslip; payroll; timesheet; employment agreement; HR",
    "personal | Personal documents, IDs, letters, handwritten notes | identity card; passport; driving licence; certificate; personal letter; handwritten note; notes; song lyrics; poem",
    "medical | Health and medical records | medical report; prescription; lab results; vaccination; medical invoice",
    "edu | Education and training | certificate; transcript; diploma; course material; thesis; enrollment",
    "media | Media and content | ebook; article; photo; screenshot; scan of photo; audio; video",
    "tech | Technical docs | manual; datasheet; spec; API documentation; architecture; configuration; logs",
    "unknown | Unclassified / skipped |",
];

/// Default Italian taxonomy.
pub const DEFAULT_TAXONOMY_IT: &[&str] = &[
    "casa | Abitazione e immobili: affitto, condominio, utenze, manutenzione | affitto; contratto locazione; condominio; manutenzione; assicurazione casa; bolletta; luce; gas; acqua; internet",
    "acquisti | Acquisti e abbonamenti: ordini, ricevute, garanzie | ricevuta; scontrino; ordine; abbonamento; garanzia; fattura acquisto; e-commerce",
    "viaggi | Viaggi e trasporti: prenotazioni, biglietti, itinerari | volo; biglietto; hotel; prenotazione; itinerario; noleggio auto; treno",
    "tasse | Tasse e pubblica amministrazione | F24; dichiarazione redditi; Agenzia Entrate; tributo; avviso pagamento; PagoPA; imposta",
    "banca | Banca e pagamenti generici | estratto conto; bonifico; carta; transazione; addebito; ricevuta pagamento",
    "legale | Documenti legali e compliance | contratto; termini; privacy; diffida; procura; atto; NDA; lettera legale",
    "lavoro | Documenti di lavoro e professionali | busta paga; cedolino; payroll; timesheet; contratto lavoro; offerta; HR",
    "personale | Documenti personali, identità, lettere, appunti | carta identità; passaporto; patente; certificato; lettera personale; appunti; scritto a mano",
    "salute | Documenti sanitari e medici | referto; ricetta; analisi; visita; certificato medico; vaccino; fattura medica",
    "studio | Scuola, università e formazione | attestato; certificato; diploma; transcript; materiale corso; iscrizione; tesi",
    "media | Contenuti e media: libri, foto, screenshot, audio/video | ebook; libro; articolo; foto; screenshot; scansione foto; audio; video",
    "tecnica | Documenti tecnici: manuali, specifiche, documentazione | manuale; specifica; datasheet; documentazione API; configurazione; log; guida",
    "sconosciuto | Non classificato / saltato |",
];

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]{1,63}$").expect("valid regex"))
}

/// Status names that may never be used as category names.
const RESERVED_NAMES: &[&str] = &[
    "pending",
    "scanning",
    "scanned",
    "classifying",
    "classified",
    "moving",
    "moved",
];

/// Parse user-editable taxonomy lines.
///
/// Returns the taxonomy plus human-readable per-line errors. Lines starting
/// with `#` and blank lines are skipped; duplicates keep the first occurrence;
/// `unknown` is appended when missing.
pub fn parse_taxonomy_lines<S: AsRef<str>>(lines: &[S]) -> (Taxonomy, Vec<String>) {
    let mut errors = Vec::new();
    let mut categories: Vec<TaxonomyCategory> = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let lineno = idx + 1;
        let line = raw.as_ref().trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        let name = parts.first().map(|p| p.to_lowercase()).unwrap_or_default();
        if name.is_empty() {
            errors.push(format!("Line {lineno}: missing category name"));
            continue;
        }
        if !name_re().is_match(&name) {
            errors.push(format!(
                "Line {lineno}: invalid category name '{name}' (use: a-z, 0-9, '_' or '-', 2-64 chars)"
            ));
            continue;
        }
        if RESERVED_NAMES.contains(&name.as_str()) {
            errors.push(format!("Line {lineno}: reserved category name '{name}'"));
            continue;
        }

        let description = parts.get(1).map(|s| s.to_string()).unwrap_or_default();
        let examples: Vec<String> = parts
            .get(2)
            .map(|s| {
                s.split(';')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .take(12)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        categories.push(TaxonomyCategory {
            name,
            description,
            examples,
        });
    }

    if !categories.iter().any(|c| c.name == "unknown") {
        categories.push(TaxonomyCategory {
            name: "unknown".to_string(),
            description: "Unclassified / skipped".to_string(),
            examples: Vec::new(),
        });
    }

    // De-duplicate keeping first occurrence.
    let mut seen = std::collections::HashSet::new();
    let mut deduped = Vec::new();
    for c in categories {
        if seen.insert(c.name.clone()) {
            deduped.push(c);
        }
    }

    if deduped.is_empty() {
        errors.push("No valid categories found".to_string());
        deduped.push(TaxonomyCategory {
            name: "unknown".to_string(),
            description: "Unclassified / skipped".to_string(),
            examples: Vec::new(),
        });
    }

    (Taxonomy { categories: deduped }, errors)
}

/// The default taxonomy lines for a language code ("it" gets the Italian set,
/// anything else English).
pub fn default_taxonomy_lines(lang: &str) -> &'static [&'static str] {
    if lang == "it" {
        DEFAULT_TAXONOMY_IT
    } else {
        DEFAULT_TAXONOMY_EN
    }
}

/// Load the folder's taxonomy file, falling back to the language default
/// when the file is missing. Parse errors come back alongside.
pub fn load_for_folder(root: &std::path::Path, lang: &str) -> (Taxonomy, Vec<String>) {
    let path = crate::config::AppConfig::taxonomy_path(root);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let lines: Vec<&str> = content.lines().collect();
            parse_taxonomy_lines(&lines)
        }
        Err(_) => (
            parse_taxonomy_lines(default_taxonomy_lines(lang)).0,
            Vec::new(),
        ),
    }
}

/// Write the default taxonomy for `lang` into the folder's data dir so
/// the user has a file to edit.
pub fn write_default_taxonomy(root: &std::path::Path, lang: &str) -> crate::Result<std::path::PathBuf> {
    let path = crate::config::AppConfig::taxonomy_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::from("# One category per line: name | description | example1; example2\n");
    for line in default_taxonomy_lines(lang) {
        content.push_str(line);
        content.push('\n');
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_lines() {
        let lines = ["bills | Utility bills | electricity; gas", "work | Work docs |"];
        let (tax, errors) = parse_taxonomy_lines(&lines);
        assert!(errors.is_empty());
        assert_eq!(tax.allowed_names(), vec!["bills", "work", "unknown"]);
        assert_eq!(tax.categories[0].examples, vec!["electricity", "gas"]);
    }

    #[test]
    fn test_parse_rejects_invalid_and_reserved_names() {
        let lines = ["Bad Name | x |", "pending | y |", "ok | fine |"];
        let (tax, errors) = parse_taxonomy_lines(&lines);
        assert_eq!(errors.len(), 2);
        assert_eq!(tax.allowed_names(), vec!["ok", "unknown"]);
    }

    #[test]
    fn test_unknown_always_present_and_deduped() {
        let lines = ["aa | one |", "aa | two |", "unknown | custom |"];
        let (tax, _errors) = parse_taxonomy_lines(&lines);
        assert_eq!(tax.allowed_names(), vec!["aa", "unknown"]);
        assert_eq!(tax.categories[0].description, "one");
    }

    #[test]
    fn test_empty_input_yields_unknown_only() {
        let lines: [&str; 0] = [];
        let (tax, _errors) = parse_taxonomy_lines(&lines);
        assert_eq!(tax.allowed_names(), vec!["unknown"]);
    }

    #[test]
    fn test_prompt_block_format() {
        let lines = ["bills | Utility bills | electricity; gas"];
        let (tax, _) = parse_taxonomy_lines(&lines);
        let block = tax.to_prompt_block();
        assert!(block.contains("- bills: Utility bills Examples: electricity; gas"));
        assert!(block.contains("- unknown: Unclassified / skipped"));
    }

    #[test]
    fn test_default_taxonomy_parses_clean() {
        let (tax, errors) = parse_taxonomy_lines(DEFAULT_TAXONOMY_EN);
        assert!(errors.is_empty());
        assert!(tax.contains("unknown"));
        assert!(tax.contains("house"));
    }
}
