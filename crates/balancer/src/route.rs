//! Tile request paths.
//!
//! Two shapes are accepted:
//!
//! - `/{layer}/{z}/{x}/{y}/{file}`
//! - `/{layer}/{z}/{x}/{y}{suffix}.{ext}`, where the row and a wildcard file
//!   key share the last segment: `5@2x.png` is row 5, file `*@2x.png`.
//!
//! Anything after a `?` in the file is dropped.

use std::fmt;

use corelib::tile::TileCoord;

/// A parsed tile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub layer: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
    pub file: String,
}

impl TileRequest {
    /// Parse a request target (path plus optional query). Returns `None` for
    /// anything that is not a tile URL.
    pub fn parse(path_and_query: &str) -> Option<Self> {
        let rest = path_and_query.strip_prefix('/').unwrap_or(path_and_query);
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() < 4 {
            return None;
        }

        let z = parts[1].parse::<u32>().ok()?;
        let x = parts[2].parse::<u32>().ok()?;

        let (y, file) = match parts[3].split_once('.') {
            Some((stem, after)) => {
                let y = leading_number(stem)?;
                // Drop as many leading bytes as the row has decimal digits.
                let suffix = &stem[y.to_string().len()..];
                let ext = after.split('.').next().unwrap_or_default();
                (y, format!("*{}.{}", suffix, ext))
            }
            None => (leading_number(parts[3])?, parts.get(4)?.to_string()),
        };

        let file = match file.find('?') {
            Some(pos) => file[..pos].to_string(),
            None => file,
        };
        if file.is_empty() {
            return None;
        }

        Some(Self {
            layer: parts[0].to_string(),
            z,
            x,
            y,
            file,
        })
    }

    pub fn tile(&self) -> TileCoord {
        TileCoord::new(self.z, self.x, self.y)
    }
}

impl fmt::Display for TileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.layer, self.tile(), self.file)
    }
}

/// Value of the run of ASCII digits at the start of `s`.
fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str) -> Option<(String, u32, u32, u32, String)> {
        TileRequest::parse(path).map(|r| (r.layer, r.z, r.x, r.y, r.file))
    }

    fn ok(layer: &str, z: u32, x: u32, y: u32, file: &str) -> Option<(String, u32, u32, u32, String)> {
        Some((layer.to_string(), z, x, y, file.to_string()))
    }

    #[test]
    fn test_plain_form() {
        assert_eq!(parse("/basemap/3/2/1/tile.png"), ok("basemap", 3, 2, 1, "tile.png"));
        assert_eq!(parse("/basemap/3/2/1/tile.png?v=2"), ok("basemap", 3, 2, 1, "tile.png"));
    }

    #[test]
    fn test_fused_form() {
        assert_eq!(parse("/basemap/3/2/5@2x.png"), ok("basemap", 3, 2, 5, "*@2x.png"));
        assert_eq!(parse("/basemap/3/2/5.png"), ok("basemap", 3, 2, 5, "*.png"));
        assert_eq!(parse("/basemap/3/2/5.png?x=1"), ok("basemap", 3, 2, 5, "*.png"));
        assert_eq!(parse("/basemap/3/2/12.grid.json"), ok("basemap", 3, 2, 12, "*.grid"));
    }

    #[test]
    fn test_fused_form_leading_zeros() {
        // The suffix loses as many bytes as the row has digits.
        assert_eq!(parse("/l/3/2/007@2x.png"), ok("l", 3, 2, 7, "*07@2x.png"));
    }

    #[test]
    fn test_too_few_segments() {
        assert_eq!(parse("/"), None);
        assert_eq!(parse("/basemap/3/2"), None);
        assert_eq!(parse("/robots.txt"), None);
    }

    #[test]
    fn test_non_numeric_coordinates() {
        assert_eq!(parse("/basemap/z/2/1/t.png"), None);
        assert_eq!(parse("/basemap/3/x/1/t.png"), None);
        assert_eq!(parse("/basemap/3/2/y/t.png"), None);
        assert_eq!(parse("/basemap/3/2/abc.png"), None);
        assert_eq!(parse("/basemap/-3/2/1/t.png"), None);
        assert_eq!(parse("/basemap//2/1/t.png"), None);
    }

    #[test]
    fn test_missing_or_empty_file() {
        assert_eq!(parse("/basemap/3/2/1"), None);
        assert_eq!(parse("/basemap/3/2/1/"), None);
        assert_eq!(parse("/basemap/3/2/1/?v=1"), None);
    }

    #[test]
    fn test_row_with_trailing_text() {
        assert_eq!(parse("/basemap/3/2/1abc/t.png"), ok("basemap", 3, 2, 1, "t.png"));
    }

    #[test]
    fn test_display() {
        let req = TileRequest::parse("/basemap/3/2/1/t.png").unwrap();
        assert_eq!(req.to_string(), "basemap/3/2/1/t.png");
        assert_eq!(req.tile(), TileCoord::new(3, 2, 1));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn plain_paths_parse(
                layer in "[a-z][a-z0-9_-]{0,11}",
                z in 0u32..30,
                x in any::<u32>(),
                y in any::<u32>(),
                file in "[a-z]{1,8}\\.(png|pbf|json)",
            ) {
                let path = format!("/{}/{}/{}/{}/{}", layer, z, x, y, file);
                prop_assert_eq!(parse(&path), ok(&layer, z, x, y, &file));
            }

            #[test]
            fn fused_paths_parse(
                layer in "[a-z]{1,8}",
                z in 0u32..30,
                x in any::<u32>(),
                y in any::<u32>(),
                suffix in "(@2x)?",
            ) {
                let path = format!("/{}/{}/{}/{}{}.png?v=1", layer, z, x, y, suffix);
                let file = format!("*{}.png", suffix);
                prop_assert_eq!(parse(&path), ok(&layer, z, x, y, &file));
            }
        }
    }
}
