//! Manifest reader properties

use gdelt_ingest::manifest::{ArtifactKind, ManifestReader};
use proptest::prelude::*;
use std::io::Cursor;

fn group_lines(stamp: u64, noise: &str) -> String {
    format!(
        "{size} 297a16b493de7cf6ca809a7cc31d0b93 http://data.gdeltproject.org/gdeltv2/{stamp}.export.CSV.zip\n\
         {noise}\n\
         {noise} {noise}\n",
        size = 150_000 + stamp % 1000,
        stamp = stamp,
        noise = noise
    )
}

proptest! {
    #[test]
    fn prop_one_entry_per_group(
        stamps in prop::collection::vec(20150218230000u64..20991231235959u64, 0..40),
        noise in "[a-z0-9]{1,12}",
    ) {
        let manifest: String = stamps.iter().map(|s| group_lines(*s, &noise)).collect();
        let mut reader = ManifestReader::new(Cursor::new(manifest));

        let entries: Vec<_> = reader
            .by_ref()
            .collect::<gdelt_common::Result<_>>()
            .unwrap();

        prop_assert_eq!(entries.len(), stamps.len());
        prop_assert_eq!(reader.consumed(), stamps.len());
        prop_assert_eq!(reader.skipped(), 2 * stamps.len());
        for (entry, stamp) in entries.iter().zip(&stamps) {
            prop_assert_eq!(entry.kind, ArtifactKind::Export);
            prop_assert_eq!(entry.file_name(), format!("{}.export.CSV.zip", stamp));
        }
    }
}

#[test]
fn test_blank_lines_between_groups_are_ignored() {
    let manifest = format!("{}\n\n{}", group_lines(1, "m"), group_lines(2, "g"));
    let entries: Vec<_> = ManifestReader::new(Cursor::new(manifest))
        .collect::<gdelt_common::Result<_>>()
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].line_number, 6);
}
