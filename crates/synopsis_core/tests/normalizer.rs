use synopsis_core::import::{Normalizer, RawRecord};
use synopsis_core::model::reference::{SourceId, YearValue};

#[test]
fn supplied_required_fields_are_never_emptied() {
    let normalizer = Normalizer::default();
    let cases = [
        ("  The   bats ", "Smith, A. and Jones, B.", "2001"),
        ("Éco-corridors", "Dupont, J.; Müller, K.", "1999/2000"),
        ("Roost\nsurveys", "Lee, K. & Park, S.", "n.d. [1987]"),
        ("A", "Kunz", "forthcoming"),
    ];
    for (index, (title, authors, year)) in cases.into_iter().enumerate() {
        let record = RawRecord::new()
            .with_text("TI", title)
            .with_text("AU", authors)
            .with_text("PY", year);
        let draft = normalizer.normalize(index, &record).unwrap();
        assert!(!draft.title.is_empty(), "case {index}");
        assert!(!draft.authors.is_empty(), "case {index}");
        assert!(draft.authors.iter().all(|author| !author.is_empty()));
        match &draft.year {
            YearValue::Exact { .. } => {}
            YearValue::Uncertain { raw, .. } => assert!(!raw.is_empty(), "case {index}"),
        }
        assert_eq!(draft.raw_fields.len(), 3);
    }
}

#[test]
fn uncertain_year_keeps_raw_text_and_guess() {
    let record = RawRecord::new()
        .with_text("TI", "Bats")
        .with_text("AU", "Smith, A.")
        .with_text("PY", "printed in 1994?");
    let draft = Normalizer::default().normalize(0, &record).unwrap();
    assert_eq!(
        draft.year,
        YearValue::Uncertain {
            guess: Some(1994),
            raw: "printed in 1994?".to_string(),
        }
    );
}

#[test]
fn doi_and_author_case_normalize_to_shared_keys() {
    let normalizer = Normalizer::default();
    let upper = RawRecord::new()
        .with_text("TI", "Bats of the World")
        .with_text("AU", "SMITH, ANNA")
        .with_text("PY", "2010")
        .with_text("DO", "https://doi.org/10.1000/ABC.1");
    let lower = RawRecord::new()
        .with_text("TI", "bats of the world")
        .with_text("AU", "smith, anna")
        .with_text("PY", "2010")
        .with_text("DO", "doi:10.1000/abc.1");

    let a = normalizer.normalize(0, &upper).unwrap();
    let b = normalizer.normalize(1, &lower).unwrap();
    assert_eq!(a.normalized, b.normalized);
    assert_eq!(a.source_id, Some(SourceId::Doi("10.1000/abc.1".to_string())));
    assert_eq!(a.source_id, b.source_id);
}
