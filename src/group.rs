//! Parses and serializes the disc-header group syntax:
//! `"0;<disc>//<start>-<end>;<title>//..."`, 1-based inclusive track ranges.

/// A contiguous, 1-based inclusive range of track indices sharing a title.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Group {
    pub title: String,
    pub start: u32,
    pub end: u32,
}

/// The parsed disc header: a title plus an ordered list of groups.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct DiscHeader {
    pub title: String,
    pub groups: Vec<Group>,
}

impl DiscHeader {
    pub fn parse(raw: &str) -> Self {
        if !raw.ends_with("//") {
            return DiscHeader { title: raw.to_string(), groups: Vec::new() };
        }

        let mut title = String::new();
        let mut groups = Vec::new();
        for (i, part) in raw.split("//").enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 && part.starts_with("0;") {
                title = part[2..].to_string();
            } else if let Some(sep) = part.find(';') {
                let range = &part[..sep];
                let group_title = &part[sep + 1..];
                if let Some(dash) = range.find('-') {
                    let start: u32 = range[..dash].parse().unwrap_or(0);
                    let end: u32 = range[dash + 1..].parse().unwrap_or(0);
                    groups.push(Group { title: group_title.to_string(), start, end });
                }
            }
        }
        DiscHeader { title, groups }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::from("0;");
        out.push_str(&self.title);
        out.push_str("//");
        for g in &self.groups {
            out.push_str(&format!("{}-{};{}//", g.start, g.end, g.title));
        }
        out
    }

    /// Adds a new group at the end of the list.
    pub fn add_group(&mut self, title: impl Into<String>, start: u32, end: u32) -> &Group {
        self.groups.push(Group { title: title.into(), start, end });
        self.groups.last().unwrap()
    }

    /// Returns the first group containing the 0-based track index
    /// (`track_idx + 1` against the group's 1-based, inclusive range), or
    /// `None` if no group matches.
    pub fn search_group(&self, track_idx: u32) -> Option<&Group> {
        let track = track_idx + 1;
        self.groups.iter().find(|g| track >= g.start && track <= g.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_with_groups() {
        let raw = "0;Demo//1-3;Rock//4-4;Jazz//";
        let parsed = DiscHeader::parse(raw);
        assert_eq!(parsed.title, "Demo");
        assert_eq!(parsed.groups.len(), 2);
        assert_eq!(parsed.serialize(), raw);
    }

    #[test]
    fn bare_title_has_no_groups() {
        let parsed = DiscHeader::parse("My Disc");
        assert_eq!(parsed.title, "My Disc");
        assert!(parsed.groups.is_empty());
        // serialize always adds the group syntax; a bare title without
        // trailing `//` does not round-trip byte-for-byte.
        assert_eq!(parsed.serialize(), "0;My Disc//");
    }

    #[test]
    fn search_group_by_track_index() {
        let parsed = DiscHeader::parse("0;Demo//1-3;Rock//4-4;Jazz//");
        assert_eq!(parsed.search_group(0).unwrap().title, "Rock"); // track 1
        assert_eq!(parsed.search_group(2).unwrap().title, "Rock"); // track 3
        assert_eq!(parsed.search_group(3).unwrap().title, "Jazz"); // track 4
        assert!(parsed.search_group(4).is_none()); // track 5, out of range
    }

    #[test]
    fn search_group_returns_at_most_one_for_disjoint_ranges() {
        let parsed = DiscHeader::parse("0;Demo//1-2;A//3-4;B//");
        assert!(parsed.search_group(1).is_some()); // track 2 in A
        assert_eq!(parsed.search_group(1).unwrap().title, "A");
    }
}
