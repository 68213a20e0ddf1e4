//! Known property codes and their English labels.
//!
//! Only codes in this table may be requested through the property-fetch tool.
//! The table is intentionally broad: people, places, organizations, creative
//! works, sports, taxa and events.

pub const START_TIME: &str = "P580";
pub const END_TIME: &str = "P582";
pub const POINT_IN_TIME: &str = "P585";

/// Statement qualifiers carried through property fetches, with the short
/// names used when rendering them.
pub const TEMPORAL_QUALIFIERS: &[(&str, &str)] =
    &[(START_TIME, "start"), (END_TIME, "end"), (POINT_IN_TIME, "time")];

const PROPERTIES: &[(&str, &str)] = &[
    // classification
    ("P31", "instance of"),
    ("P279", "subclass of"),
    ("P361", "part of"),
    ("P527", "has part(s)"),
    ("P155", "follows"),
    ("P156", "followed by"),
    ("P138", "named after"),
    ("P1448", "official name"),
    ("P1449", "nickname"),
    // people
    ("P21", "sex or gender"),
    ("P569", "date of birth"),
    ("P570", "date of death"),
    ("P19", "place of birth"),
    ("P20", "place of death"),
    ("P119", "place of burial"),
    ("P509", "cause of death"),
    ("P27", "country of citizenship"),
    ("P735", "given name"),
    ("P734", "family name"),
    ("P1477", "birth name"),
    ("P742", "pseudonym"),
    ("P106", "occupation"),
    ("P108", "employer"),
    ("P937", "work location"),
    ("P69", "educated at"),
    ("P512", "academic degree"),
    ("P184", "doctoral advisor"),
    ("P185", "doctoral student"),
    ("P1066", "student of"),
    ("P802", "student"),
    ("P101", "field of work"),
    ("P166", "award received"),
    ("P39", "position held"),
    ("P102", "member of political party"),
    ("P463", "member of"),
    ("P800", "notable work"),
    ("P26", "spouse"),
    ("P451", "unmarried partner"),
    ("P22", "father"),
    ("P25", "mother"),
    ("P40", "child"),
    ("P3373", "sibling"),
    ("P1038", "relative"),
    ("P140", "religion or worldview"),
    ("P103", "native language"),
    ("P1412", "languages spoken, written or signed"),
    ("P551", "residence"),
    ("P1344", "participant in"),
    ("P737", "influenced by"),
    ("P135", "movement"),
    ("P241", "military branch"),
    ("P410", "military rank"),
    ("P607", "conflict"),
    ("P2031", "work period (start)"),
    ("P2032", "work period (end)"),
    ("P2048", "height"),
    // places
    ("P17", "country"),
    ("P131", "located in the administrative territorial entity"),
    ("P30", "continent"),
    ("P36", "capital"),
    ("P1376", "capital of"),
    ("P35", "head of state"),
    ("P6", "head of government"),
    ("P1082", "population"),
    ("P2046", "area"),
    ("P37", "official language"),
    ("P38", "currency"),
    ("P47", "shares border with"),
    ("P150", "contains the administrative territorial entity"),
    ("P625", "coordinate location"),
    ("P194", "legislative body"),
    ("P530", "diplomatic relation"),
    ("P2044", "elevation above sea level"),
    ("P206", "located in or next to body of water"),
    ("P4552", "mountain range"),
    ("P885", "origin of the watercourse"),
    ("P403", "mouth of the watercourse"),
    ("P2043", "length"),
    ("P276", "location"),
    ("P84", "architect"),
    ("P149", "architectural style"),
    ("P1435", "heritage designation"),
    ("P1619", "date of official opening"),
    // organizations
    ("P571", "inception"),
    ("P576", "dissolved, abolished or demolished date"),
    ("P112", "founded by"),
    ("P159", "headquarters location"),
    ("P452", "industry"),
    ("P169", "chief executive officer"),
    ("P488", "chairperson"),
    ("P749", "parent organization"),
    ("P355", "has subsidiary"),
    ("P127", "owned by"),
    ("P1830", "owner of"),
    ("P1128", "employees"),
    ("P2139", "total revenue"),
    ("P1454", "legal form"),
    ("P856", "official website"),
    ("P1001", "applies to jurisdiction"),
    // creative works
    ("P50", "author"),
    ("P57", "director"),
    ("P58", "screenwriter"),
    ("P161", "cast member"),
    ("P162", "producer"),
    ("P272", "production company"),
    ("P86", "composer"),
    ("P170", "creator"),
    ("P175", "performer"),
    ("P264", "record label"),
    ("P577", "publication date"),
    ("P123", "publisher"),
    ("P136", "genre"),
    ("P495", "country of origin"),
    ("P364", "original language of film or TV show"),
    ("P407", "language of work or name"),
    ("P921", "main subject"),
    ("P1433", "published in"),
    ("P356", "DOI"),
    ("P176", "manufacturer"),
    ("P178", "developer"),
    ("P61", "discoverer or inventor"),
    ("P575", "time of discovery or invention"),
    // events and sport
    ("P585", "point in time"),
    ("P580", "start time"),
    ("P582", "end time"),
    ("P710", "participant"),
    ("P1346", "winner"),
    ("P793", "significant event"),
    ("P54", "member of sports team"),
    ("P413", "position played on team / speciality"),
    ("P641", "sport"),
    ("P118", "league"),
    ("P286", "head coach"),
    ("P115", "home venue"),
    // science
    ("P171", "parent taxon"),
    ("P225", "taxon name"),
    ("P105", "taxon rank"),
    ("P141", "IUCN conservation status"),
    ("P274", "chemical formula"),
    ("P246", "element symbol"),
    ("P1086", "atomic number"),
    ("P2067", "mass"),
    ("P780", "symptoms and signs"),
    ("P2176", "drug or therapy used for treatment"),
    ("P1050", "medical condition"),
];

/// Normalize a user-supplied property code (`" p36 "` -> `"P36"`).
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// English label of a known property code.
pub fn property_label(code: &str) -> Option<&'static str> {
    let code = normalize_code(code);
    PROPERTIES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

pub fn is_known_property(code: &str) -> bool {
    property_label(code).is_some()
}

/// All known `(code, label)` pairs, in catalog order.
pub fn known_properties() -> impl Iterator<Item = (&'static str, &'static str)> {
    PROPERTIES.iter().copied()
}
