//! Container compression header: preservation map, data-series encodings,
//! and tag encodings.

use super::encoding::Encoding;
use super::num::ByteReader;
use crate::{Error, Result};
use std::collections::HashMap;

const BASES: [u8; 5] = *b"ACGTN";

/// Substitution matrix from the `SM` preservation entry: for each reference
/// base (A, C, G, T, N) maps a 2-bit substitution code to the read base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionMatrix([[u8; 4]; 5]);

impl SubstitutionMatrix {
    pub fn new(encoded: [u8; 5]) -> Self {
        let mut matrix = [[b'N'; 4]; 5];
        for (ref_index, &byte) in encoded.iter().enumerate() {
            let alternatives = BASES
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != ref_index)
                .map(|(_, &b)| b);
            for (k, base) in alternatives.enumerate() {
                let code = (byte >> (6 - 2 * k)) & 0x03;
                matrix[ref_index][code as usize] = base;
            }
        }
        Self(matrix)
    }

    /// Read base for a substitution of `reference_base` with `code`.
    pub fn get(&self, reference_base: u8, code: u8) -> u8 {
        let ref_index = match reference_base.to_ascii_uppercase() {
            b'A' => 0,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            _ => 4,
        };
        self.0[ref_index][(code & 0x03) as usize]
    }
}

impl Default for SubstitutionMatrix {
    fn default() -> Self {
        Self::new([0x1b; 5])
    }
}

/// SAM tag id as stored in the tag dictionary: two name bytes and a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagKey {
    pub name: [u8; 2],
    pub ty: u8,
}

impl TagKey {
    /// ITF8 key used by the tag encoding map.
    pub fn id(&self) -> i32 {
        (self.name[0] as i32) << 16 | (self.name[1] as i32) << 8 | self.ty as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservationMap {
    pub read_names_included: bool,
    pub ap_delta: bool,
    pub reference_required: bool,
    pub substitution_matrix: SubstitutionMatrix,
    pub tag_dictionary: Vec<Vec<TagKey>>,
}

impl Default for PreservationMap {
    fn default() -> Self {
        Self {
            read_names_included: true,
            ap_delta: true,
            reference_required: true,
            substitution_matrix: SubstitutionMatrix::default(),
            tag_dictionary: Vec::new(),
        }
    }
}

impl PreservationMap {
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let data = reader.read_byte_array()?;
        let mut reader = ByteReader::new(data);
        let count = reader.read_len()?;
        let mut map = Self::default();

        for _ in 0..count {
            let key: [u8; 2] = reader.read_array()?;
            match &key {
                b"RN" => map.read_names_included = reader.read_u8()? != 0,
                b"AP" => map.ap_delta = reader.read_u8()? != 0,
                b"RR" => map.reference_required = reader.read_u8()? != 0,
                b"SM" => map.substitution_matrix = SubstitutionMatrix::new(reader.read_array()?),
                b"TD" => map.tag_dictionary = parse_tag_dictionary(reader.read_byte_array()?)?,
                _ => {
                    return Err(Error::Decode(format!(
                        "unknown preservation map key: {}",
                        String::from_utf8_lossy(&key)
                    )));
                }
            }
        }

        Ok(map)
    }
}

fn parse_tag_dictionary(data: &[u8]) -> Result<Vec<Vec<TagKey>>> {
    let data = data.strip_suffix(&[0]).unwrap_or(data);
    if data.is_empty() {
        return Ok(vec![Vec::new()]);
    }

    data.split(|&b| b == 0)
        .map(|line| {
            if line.len() % 3 != 0 {
                return Err(Error::Decode("malformed tag dictionary line".to_string()));
            }
            Ok(line
                .chunks_exact(3)
                .map(|c| TagKey {
                    name: [c[0], c[1]],
                    ty: c[2],
                })
                .collect())
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionHeader {
    pub preservation_map: PreservationMap,
    data_series: HashMap<[u8; 2], Encoding>,
    tags: HashMap<i32, Encoding>,
}

impl CompressionHeader {
    pub fn new(
        preservation_map: PreservationMap,
        data_series: HashMap<[u8; 2], Encoding>,
        tags: HashMap<i32, Encoding>,
    ) -> Self {
        Self {
            preservation_map,
            data_series,
            tags,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let preservation_map = PreservationMap::read(&mut reader)?;

        let series_data = reader.read_byte_array()?;
        let mut series_reader = ByteReader::new(series_data);
        let count = series_reader.read_len()?;
        let mut data_series = HashMap::with_capacity(count.min(series_reader.remaining()));
        for _ in 0..count {
            let key: [u8; 2] = series_reader.read_array()?;
            data_series.insert(key, Encoding::read(&mut series_reader)?);
        }

        let tag_data = reader.read_byte_array()?;
        let mut tag_reader = ByteReader::new(tag_data);
        let count = tag_reader.read_len()?;
        let mut tags = HashMap::with_capacity(count.min(tag_reader.remaining()));
        for _ in 0..count {
            let key = tag_reader.read_itf8()?;
            tags.insert(key, Encoding::read(&mut tag_reader)?);
        }

        Ok(Self {
            preservation_map,
            data_series,
            tags,
        })
    }

    /// Encoding of a data series such as `b"BF"`.
    pub fn series(&self, key: &[u8; 2]) -> Result<&Encoding> {
        self.data_series.get(key).ok_or_else(|| {
            Error::Decode(format!(
                "missing encoding for data series {}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    pub fn tag(&self, key: &TagKey) -> Result<&Encoding> {
        self.tags.get(&key.id()).ok_or_else(|| {
            Error::Decode(format!(
                "missing encoding for tag {}{}:{}",
                key.name[0] as char, key.name[1] as char, key.ty as char
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflated_series_count_is_truncated() {
        // Empty preservation map, then a series map claiming i32::MAX entries.
        let mut data = vec![0x01, 0x00];
        data.extend_from_slice(&[0x06, 0xf7, 0xff, 0xff, 0xff, 0x0f, b'B']);
        data.push(0x00);
        assert!(matches!(
            CompressionHeader::parse(&data),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn test_default_substitution_matrix() {
        let matrix = SubstitutionMatrix::default();
        assert_eq!(matrix.get(b'A', 0), b'C');
        assert_eq!(matrix.get(b'A', 3), b'N');
        assert_eq!(matrix.get(b'c', 0), b'A');
        assert_eq!(matrix.get(b'T', 2), b'G');
        assert_eq!(matrix.get(b'N', 3), b'T');
    }

    #[test]
    fn test_custom_substitution_matrix() {
        // For reference A, alternatives C G T N get codes 3 2 1 0.
        let matrix = SubstitutionMatrix::new([0b11_10_01_00, 0x1b, 0x1b, 0x1b, 0x1b]);
        assert_eq!(matrix.get(b'A', 0), b'N');
        assert_eq!(matrix.get(b'A', 3), b'C');
        assert_eq!(matrix.get(b'G', 0), b'A');
    }

    #[test]
    fn test_tag_dictionary() {
        let lines = parse_tag_dictionary(b"NMiMDZ\0\0RGZ\0").unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0][1], TagKey {
            name: *b"MD",
            ty: b'Z'
        });
        assert!(lines[1].is_empty());
        assert_eq!(lines[2][0].id(), (b'R' as i32) << 16 | (b'G' as i32) << 8 | b'Z' as i32);
    }

    #[test]
    fn test_parse_compression_header() {
        let mut data = Vec::new();
        // preservation map: 2 entries RN=0, AP=1
        data.extend_from_slice(&[0x07, 0x02, b'R', b'N', 0x00, b'A', b'P', 0x01]);
        // data series: BF -> EXTERNAL 1
        data.extend_from_slice(&[0x06, 0x01, b'B', b'F', 0x01, 0x01, 0x01]);
        // tags: none
        data.extend_from_slice(&[0x01, 0x00]);

        let header = CompressionHeader::parse(&data).unwrap();
        assert!(!header.preservation_map.read_names_included);
        assert!(header.preservation_map.ap_delta);
        assert!(header.preservation_map.reference_required);
        assert_eq!(
            header.series(b"BF").unwrap(),
            &Encoding::External { content_id: 1 }
        );
        assert!(matches!(header.series(b"RL"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_preservation_key() {
        let data = [0x04, 0x01, b'Z', b'Z', 0x00];
        assert!(matches!(
            CompressionHeader::parse(&data),
            Err(Error::Decode(_))
        ));
    }
}
