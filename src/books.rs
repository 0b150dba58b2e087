//! Canonical book metadata: codes, USFM ids, display names and ordering.
//!
//! Ordering follows the Protestant canon, Old Testament first. The file number
//! matches the `NN-BOOK.usfm` naming used by scripture repositories, which
//! skips `40` between Malachi and Matthew.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Testament {
    Old,
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Book {
    pub code: &'static str,
    pub usfm_id: &'static str,
    pub name: &'static str,
    /// 1-based position in the canon.
    pub order: u8,
    pub testament: Testament,
}

impl Book {
    /// File number used in `NN-BOOK.usfm` names (`01`..`39`, `41`..`67`).
    pub fn file_number(&self) -> u8 {
        match self.testament {
            Testament::Old => self.order,
            Testament::New => self.order + 1,
        }
    }

    /// Conventional USFM file name, e.g. `32-JON.usfm`.
    pub fn usfm_file_name(&self) -> String {
        format!("{:02}-{}.usfm", self.file_number(), self.usfm_id)
    }
}

macro_rules! books {
    ($( $order:literal $code:literal $usfm:literal $name:literal $t:ident ),* $(,)?) => {
        &[ $( Book { code: $code, usfm_id: $usfm, name: $name, order: $order, testament: Testament::$t } ),* ]
    };
}

pub static BOOKS: &[Book] = books![
    1 "gen" "GEN" "Genesis" Old,
    2 "exo" "EXO" "Exodus" Old,
    3 "lev" "LEV" "Leviticus" Old,
    4 "num" "NUM" "Numbers" Old,
    5 "deu" "DEU" "Deuteronomy" Old,
    6 "jos" "JOS" "Joshua" Old,
    7 "jdg" "JDG" "Judges" Old,
    8 "rut" "RUT" "Ruth" Old,
    9 "1sa" "1SA" "1 Samuel" Old,
    10 "2sa" "2SA" "2 Samuel" Old,
    11 "1ki" "1KI" "1 Kings" Old,
    12 "2ki" "2KI" "2 Kings" Old,
    13 "1ch" "1CH" "1 Chronicles" Old,
    14 "2ch" "2CH" "2 Chronicles" Old,
    15 "ezr" "EZR" "Ezra" Old,
    16 "neh" "NEH" "Nehemiah" Old,
    17 "est" "EST" "Esther" Old,
    18 "job" "JOB" "Job" Old,
    19 "psa" "PSA" "Psalms" Old,
    20 "pro" "PRO" "Proverbs" Old,
    21 "ecc" "ECC" "Ecclesiastes" Old,
    22 "sng" "SNG" "Song of Solomon" Old,
    23 "isa" "ISA" "Isaiah" Old,
    24 "jer" "JER" "Jeremiah" Old,
    25 "lam" "LAM" "Lamentations" Old,
    26 "ezk" "EZK" "Ezekiel" Old,
    27 "dan" "DAN" "Daniel" Old,
    28 "hos" "HOS" "Hosea" Old,
    29 "jol" "JOL" "Joel" Old,
    30 "amo" "AMO" "Amos" Old,
    31 "oba" "OBA" "Obadiah" Old,
    32 "jon" "JON" "Jonah" Old,
    33 "mic" "MIC" "Micah" Old,
    34 "nam" "NAM" "Nahum" Old,
    35 "hab" "HAB" "Habakkuk" Old,
    36 "zep" "ZEP" "Zephaniah" Old,
    37 "hag" "HAG" "Haggai" Old,
    38 "zec" "ZEC" "Zechariah" Old,
    39 "mal" "MAL" "Malachi" Old,
    40 "mat" "MAT" "Matthew" New,
    41 "mrk" "MRK" "Mark" New,
    42 "luk" "LUK" "Luke" New,
    43 "jhn" "JHN" "John" New,
    44 "act" "ACT" "Acts" New,
    45 "rom" "ROM" "Romans" New,
    46 "1co" "1CO" "1 Corinthians" New,
    47 "2co" "2CO" "2 Corinthians" New,
    48 "gal" "GAL" "Galatians" New,
    49 "eph" "EPH" "Ephesians" New,
    50 "php" "PHP" "Philippians" New,
    51 "col" "COL" "Colossians" New,
    52 "1th" "1TH" "1 Thessalonians" New,
    53 "2th" "2TH" "2 Thessalonians" New,
    54 "1ti" "1TI" "1 Timothy" New,
    55 "2ti" "2TI" "2 Timothy" New,
    56 "tit" "TIT" "Titus" New,
    57 "phm" "PHM" "Philemon" New,
    58 "heb" "HEB" "Hebrews" New,
    59 "jas" "JAS" "James" New,
    60 "1pe" "1PE" "1 Peter" New,
    61 "2pe" "2PE" "2 Peter" New,
    62 "1jn" "1JN" "1 John" New,
    63 "2jn" "2JN" "2 John" New,
    64 "3jn" "3JN" "3 John" New,
    65 "jud" "JUD" "Jude" New,
    66 "rev" "REV" "Revelation" New,
];

/// Look up a book by its lowercase code or its USFM id (case-insensitive).
pub fn find(code: &str) -> Option<&'static Book> {
    let code = code.trim();
    BOOKS
        .iter()
        .find(|b| b.code.eq_ignore_ascii_case(code) || b.usfm_id.eq_ignore_ascii_case(code))
}

/// Canonical sort key. Unknown codes sort after every known book, by code.
pub fn canonical_key(code: &str) -> (u8, String) {
    match find(code) {
        Some(book) => (book.order, String::new()),
        None => (u8::MAX, code.to_ascii_lowercase()),
    }
}

/// Display name for a book code, falling back to the code itself.
pub fn display_name(code: &str) -> String {
    find(code)
        .map(|b| b.name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Sort book codes into canonical order, dropping duplicates.
pub fn sort_canonical(codes: &mut Vec<String>) {
    codes.sort_by_key(|c| canonical_key(c));
    codes.dedup();
}
