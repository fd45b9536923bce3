//! Alignment records: decoding a slice's data series and rebuilding read
//! bases against the reference.

use super::compression_header::{CompressionHeader, SubstitutionMatrix};
use super::encoding::{DecodeStreams, Encoding};
use super::num::{ByteReader, MAX_PREALLOCATION};
use super::slice::Slice;
use crate::reference::SequenceProvider;
use crate::{Error, Result};
use md5::{Digest, Md5};
use serde::{Serialize, Serializer};

/// Quality scores are stored as a per-base array.
pub const CF_QUALITY_ARRAY: u8 = 0x01;
/// Mate information is stored explicitly rather than by in-slice reference.
pub const CF_DETACHED: u8 = 0x02;
/// The next fragment of the template follows later in the same slice.
pub const CF_MATE_DOWNSTREAM: u8 = 0x04;
/// The read sequence is unknown (`*`).
pub const CF_UNKNOWN_BASES: u8 = 0x08;

pub const FLAG_PAIRED: u16 = 0x01;
pub const FLAG_UNMAPPED: u16 = 0x04;
pub const FLAG_MATE_UNMAPPED: u16 = 0x08;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_MATE_REVERSE: u16 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeatureCode {
    /// `b`: a run of read bases.
    Bases,
    /// `q`: a run of quality scores.
    Scores,
    /// `B`: one read base with its quality score.
    ReadBase,
    /// `X`: a base substitution.
    Substitution,
    /// `I`: inserted bases.
    Insertion,
    /// `D`: deleted reference bases.
    Deletion,
    /// `i`: a single inserted base.
    InsertBase,
    /// `Q`: one quality score.
    QualityScore,
    /// `N`: skipped reference region.
    ReferenceSkip,
    /// `S`: soft-clipped bases.
    SoftClip,
    /// `P`: padding.
    Padding,
    /// `H`: hard clip.
    HardClip,
}

impl TryFrom<u8> for FeatureCode {
    type Error = Error;

    fn try_from(b: u8) -> Result<Self> {
        match b {
            b'b' => Ok(Self::Bases),
            b'q' => Ok(Self::Scores),
            b'B' => Ok(Self::ReadBase),
            b'X' => Ok(Self::Substitution),
            b'I' => Ok(Self::Insertion),
            b'D' => Ok(Self::Deletion),
            b'i' => Ok(Self::InsertBase),
            b'Q' => Ok(Self::QualityScore),
            b'N' => Ok(Self::ReferenceSkip),
            b'S' => Ok(Self::SoftClip),
            b'P' => Ok(Self::Padding),
            b'H' => Ok(Self::HardClip),
            _ => Err(Error::Decode(format!(
                "unknown read feature code: {:?}",
                b as char
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeatureData {
    Base(u8),
    BaseAndScore { base: u8, score: u8 },
    SubstitutionCode(u8),
    Bases(#[serde(serialize_with = "as_text")] Vec<u8>),
    Scores(Vec<u8>),
    Score(u8),
    Length(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadFeature {
    pub code: FeatureCode,
    /// 1-based position in the read.
    pub pos_in_read: i32,
    /// 1-based reference position the feature applies at.
    pub ref_pos: i64,
    pub data: FeatureData,
}

impl ReadFeature {
    fn read_len(&self) -> i64 {
        match (&self.code, &self.data) {
            (FeatureCode::ReadBase | FeatureCode::Substitution | FeatureCode::InsertBase, _) => 1,
            (
                FeatureCode::Bases | FeatureCode::Insertion | FeatureCode::SoftClip,
                FeatureData::Bases(bases),
            ) => bases.len() as i64,
            _ => 0,
        }
    }

    fn ref_len(&self) -> i64 {
        match (&self.code, &self.data) {
            (FeatureCode::ReadBase | FeatureCode::Substitution, _) => 1,
            (FeatureCode::Bases, FeatureData::Bases(bases)) => bases.len() as i64,
            (FeatureCode::Deletion | FeatureCode::ReferenceSkip, FeatureData::Length(n)) => *n as i64,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MateInfo {
    pub sequence_id: i32,
    pub alignment_start: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Char(char),
    Int(i64),
    Float(f32),
    String(String),
    Hex(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub name: String,
    pub value: TagValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentRecord {
    pub read_name: String,
    pub sequence_id: i32,
    /// 1-based position of the first aligned base.
    pub alignment_start: i64,
    pub read_length: i64,
    /// BAM flags.
    pub flags: u16,
    pub cram_flags: u8,
    pub mapping_quality: u8,
    /// Read group index, `-1` when absent.
    pub read_group: i32,
    pub mate: Option<MateInfo>,
    pub template_size: i64,
    pub read_features: Vec<ReadFeature>,
    #[serde(serialize_with = "as_text")]
    pub sequence: Vec<u8>,
    #[serde(serialize_with = "as_phred33")]
    pub quality_scores: Vec<u8>,
    pub tags: Vec<Tag>,
}

impl AlignmentRecord {
    pub fn is_unmapped(&self) -> bool {
        self.flags & FLAG_UNMAPPED != 0
    }

    /// Number of reference bases covered by the alignment.
    pub fn reference_span(&self) -> i64 {
        self.read_length
            + self
                .read_features
                .iter()
                .map(|f| f.ref_len() - f.read_len())
                .sum::<i64>()
    }

    /// 1-based inclusive position of the last aligned reference base.
    pub fn alignment_end(&self) -> i64 {
        self.alignment_start + self.reference_span() - 1
    }

    fn needs_reference(&self) -> bool {
        !self.is_unmapped() && self.cram_flags & CF_UNKNOWN_BASES == 0
    }
}

fn as_text<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if bytes.is_empty() {
        return serializer.serialize_str("*");
    }
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn as_phred33<S: Serializer>(scores: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if scores.iter().all(|&q| q == 0xff) {
        return serializer.serialize_str("*");
    }
    let text: String = scores
        .iter()
        .map(|&q| (q.saturating_add(33).min(126)) as char)
        .collect();
    serializer.serialize_str(&text)
}

struct RecordDecoder<'a> {
    slice: &'a Slice,
    header: &'a CompressionHeader,
    streams: DecodeStreams<'a>,
    prev_alignment_start: i64,
}

impl<'a> RecordDecoder<'a> {
    fn new(slice: &'a Slice) -> Self {
        Self {
            slice,
            header: &slice.compression_header,
            streams: DecodeStreams::new(&slice.core, &slice.external),
            prev_alignment_start: slice.header.alignment_start as i64,
        }
    }

    fn int(&mut self, key: &[u8; 2]) -> Result<i32> {
        let header = self.header;
        header.series(key)?.decode_int(&mut self.streams)
    }

    fn byte(&mut self, key: &[u8; 2]) -> Result<u8> {
        let header = self.header;
        header.series(key)?.decode_byte(&mut self.streams)
    }

    fn bytes(&mut self, key: &[u8; 2]) -> Result<Vec<u8>> {
        let header = self.header;
        header.series(key)?.decode_bytes(&mut self.streams)
    }

    fn n_bytes(&mut self, key: &[u8; 2], n: usize) -> Result<Vec<u8>> {
        let header = self.header;
        header.series(key)?.decode_n_bytes(&mut self.streams, n)
    }

    /// Decode the next record, returning it with its in-slice next-fragment
    /// distance, if any.
    fn decode_record(&mut self) -> Result<(AlignmentRecord, Option<i32>)> {
        let header = self.header;
        let preservation = &header.preservation_map;

        let bam_flags = self.int(b"BF")?;
        let mut flags = u16::try_from(bam_flags)
            .map_err(|_| Error::Decode(format!("invalid BAM flags: {}", bam_flags)))?;
        let cf = self.int(b"CF")?;
        let cram_flags =
            u8::try_from(cf).map_err(|_| Error::Decode(format!("invalid CRAM flags: {}", cf)))?;

        let sequence_id = if self.slice.header.is_multi_reference() {
            self.int(b"RI")?
        } else {
            self.slice.header.reference_sequence_id
        };

        let read_length = self.int(b"RL")?;
        let read_length = usize::try_from(read_length)
            .map_err(|_| Error::Decode(format!("negative read length: {}", read_length)))?;

        let ap = self.int(b"AP")? as i64;
        let alignment_start = if preservation.ap_delta {
            self.prev_alignment_start + ap
        } else {
            ap
        };
        self.prev_alignment_start = alignment_start;

        let read_group = self.int(b"RG")?;

        let mut read_name = if preservation.read_names_included {
            Some(self.bytes(b"RN")?)
        } else {
            None
        };

        let mut mate = None;
        let mut template_size = 0;
        let mut next_fragment = None;
        if cram_flags & CF_DETACHED != 0 {
            let mate_flags = self.int(b"MF")?;
            if mate_flags & 0x1 != 0 {
                flags |= FLAG_MATE_REVERSE;
            }
            if mate_flags & 0x2 != 0 {
                flags |= FLAG_MATE_UNMAPPED;
            }
            if !preservation.read_names_included {
                read_name = Some(self.bytes(b"RN")?);
            }
            let mate_sequence_id = self.int(b"NS")?;
            let mate_start = self.int(b"NP")? as i64;
            template_size = self.int(b"TS")? as i64;
            mate = Some(MateInfo {
                sequence_id: mate_sequence_id,
                alignment_start: mate_start,
            });
        } else if cram_flags & CF_MATE_DOWNSTREAM != 0 {
            next_fragment = Some(self.int(b"NF")?);
        }

        let tags = self.read_tags()?;

        let mut read_features = Vec::new();
        let mut mapping_quality = 0;
        let mut sequence = Vec::new();
        let mut quality_scores = Vec::new();

        if flags & FLAG_UNMAPPED == 0 {
            read_features = self.read_features(alignment_start)?;
            let mq = self.int(b"MQ")?;
            mapping_quality =
                u8::try_from(mq).map_err(|_| Error::Decode(format!("invalid mapping quality: {}", mq)))?;
            if cram_flags & CF_QUALITY_ARRAY != 0 {
                quality_scores = self.n_bytes(b"QS", read_length)?;
            }
        } else {
            if cram_flags & CF_UNKNOWN_BASES == 0 {
                sequence = self.n_bytes(b"BA", read_length)?;
            }
            if cram_flags & CF_QUALITY_ARRAY != 0 {
                quality_scores = self.n_bytes(b"QS", read_length)?;
            }
        }

        let record = AlignmentRecord {
            read_name: read_name
                .map(|name| String::from_utf8_lossy(&name).into_owned())
                .unwrap_or_default(),
            sequence_id,
            alignment_start,
            read_length: read_length as i64,
            flags,
            cram_flags,
            mapping_quality,
            read_group,
            mate,
            template_size,
            read_features,
            sequence,
            quality_scores,
            tags,
        };

        Ok((record, next_fragment))
    }

    fn read_tags(&mut self) -> Result<Vec<Tag>> {
        let header = self.header;
        let dictionary = &header.preservation_map.tag_dictionary;

        let line = self.int(b"TL")?;
        if dictionary.is_empty() && line == 0 {
            return Ok(Vec::new());
        }
        let keys = usize::try_from(line)
            .ok()
            .and_then(|i| dictionary.get(i))
            .ok_or_else(|| Error::Decode(format!("tag line {} not in tag dictionary", line)))?;

        let mut tags = Vec::with_capacity(keys.len());
        for key in keys {
            let encoding = header.tag(key)?;
            let data = match (encoding, fixed_tag_len(key.ty)) {
                (Encoding::External { .. }, Some(n)) => encoding.decode_n_bytes(&mut self.streams, n)?,
                _ => encoding.decode_bytes(&mut self.streams)?,
            };
            tags.push(Tag {
                name: String::from_utf8_lossy(&key.name).into_owned(),
                value: parse_tag_value(key.ty, &data)?,
            });
        }
        Ok(tags)
    }

    fn read_features(&mut self, alignment_start: i64) -> Result<Vec<ReadFeature>> {
        let count = self.int(b"FN")?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Decode(format!("negative feature count: {}", count)))?;

        let mut features = Vec::with_capacity(count.min(self.slice.data_len()));
        let mut pos_in_read = 0;
        let mut ref_offset = 0i64;

        for _ in 0..count {
            let code = FeatureCode::try_from(self.byte(b"FC")?)?;
            pos_in_read += self.int(b"FP")?;

            let data = match code {
                FeatureCode::ReadBase => FeatureData::BaseAndScore {
                    base: self.byte(b"BA")?,
                    score: self.byte(b"QS")?,
                },
                FeatureCode::Substitution => FeatureData::SubstitutionCode(self.byte(b"BS")?),
                FeatureCode::Insertion => FeatureData::Bases(self.bytes(b"IN")?),
                FeatureCode::SoftClip => FeatureData::Bases(self.bytes(b"SC")?),
                FeatureCode::HardClip => FeatureData::Length(self.int(b"HC")?),
                FeatureCode::Padding => FeatureData::Length(self.int(b"PD")?),
                FeatureCode::Deletion => FeatureData::Length(self.int(b"DL")?),
                FeatureCode::ReferenceSkip => FeatureData::Length(self.int(b"RS")?),
                FeatureCode::InsertBase => FeatureData::Base(self.byte(b"BA")?),
                FeatureCode::Bases => FeatureData::Bases(self.bytes(b"BB")?),
                FeatureCode::Scores => FeatureData::Scores(self.bytes(b"QQ")?),
                FeatureCode::QualityScore => FeatureData::Score(self.byte(b"QS")?),
            };

            let feature = ReadFeature {
                code,
                pos_in_read,
                ref_pos: alignment_start + pos_in_read as i64 - 1 + ref_offset,
                data,
            };
            ref_offset += feature.ref_len() - feature.read_len();
            features.push(feature);
        }

        Ok(features)
    }
}

fn fixed_tag_len(ty: u8) -> Option<usize> {
    match ty {
        b'A' | b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

fn read_tag_int(reader: &mut ByteReader<'_>, ty: u8) -> Result<i64> {
    Ok(match ty {
        b'c' => reader.read_u8()? as i8 as i64,
        b'C' => reader.read_u8()? as i64,
        b's' => i16::from_le_bytes(reader.read_array()?) as i64,
        b'S' => u16::from_le_bytes(reader.read_array()?) as i64,
        b'i' => reader.read_i32_le()? as i64,
        b'I' => reader.read_u32_le()? as i64,
        _ => {
            return Err(Error::Decode(format!(
                "invalid integer tag type: {:?}",
                ty as char
            )));
        }
    })
}

/// Parse a tag value stored in BAM binary form.
pub fn parse_tag_value(ty: u8, data: &[u8]) -> Result<TagValue> {
    let mut reader = ByteReader::new(data);
    let value = match ty {
        b'A' => TagValue::Char(reader.read_u8()? as char),
        b'c' | b'C' | b's' | b'S' | b'i' | b'I' => TagValue::Int(read_tag_int(&mut reader, ty)?),
        b'f' => TagValue::Float(f32::from_le_bytes(reader.read_array()?)),
        b'Z' | b'H' => {
            let text = data.strip_suffix(&[0]).unwrap_or(data);
            let text = String::from_utf8_lossy(text).into_owned();
            if ty == b'Z' {
                TagValue::String(text)
            } else {
                TagValue::Hex(text)
            }
        }
        b'B' => {
            let subtype = reader.read_u8()?;
            let count = reader.read_u32_le()? as usize;
            if subtype == b'f' {
                let values = (0..count)
                    .map(|_| Ok(f32::from_le_bytes(reader.read_array()?)))
                    .collect::<Result<_>>()?;
                TagValue::FloatArray(values)
            } else {
                let values = (0..count)
                    .map(|_| read_tag_int(&mut reader, subtype))
                    .collect::<Result<_>>()?;
                TagValue::IntArray(values)
            }
        }
        _ => {
            return Err(Error::Decode(format!(
                "unknown tag type: {:?}",
                ty as char
            )));
        }
    };
    Ok(value)
}

/// Decode every record of a slice without touching the reference.
///
/// Mapped reads come back with an empty `sequence`; see [`reconstruct`].
pub fn decode_records(slice: &Slice) -> Result<Vec<AlignmentRecord>> {
    let count = usize::try_from(slice.header.record_count).map_err(|_| {
        Error::Decode(format!("negative record count: {}", slice.header.record_count))
    })?;

    let capacity = count.min(slice.data_len());
    let mut decoder = RecordDecoder::new(slice);
    let mut records = Vec::with_capacity(capacity);
    let mut next_fragments = Vec::with_capacity(capacity);
    for _ in 0..count {
        let (record, next_fragment) = decoder.decode_record()?;
        records.push(record);
        next_fragments.push(next_fragment);
    }

    resolve_mates(&mut records, &next_fragments, slice.header.record_counter);
    Ok(records)
}

fn resolve_mates(records: &mut [AlignmentRecord], next_fragments: &[Option<i32>], record_counter: i64) {
    for (i, next_fragment) in next_fragments.iter().enumerate() {
        let Some(distance) = next_fragment.and_then(|n| usize::try_from(n).ok()) else {
            continue;
        };
        let j = i + distance + 1;
        if j >= records.len() {
            tracing::warn!(record = i, distance, "next fragment lies outside the slice");
            continue;
        }

        if records[i].read_name.is_empty() {
            records[i].read_name = (record_counter + i as i64).to_string();
        }
        let (head, tail) = records.split_at_mut(j);
        link_mates(&mut head[i], &mut tail[0]);
    }

    for (i, record) in records.iter_mut().enumerate() {
        if record.read_name.is_empty() {
            record.read_name = (record_counter + i as i64).to_string();
        }
    }
}

fn link_mates(a: &mut AlignmentRecord, b: &mut AlignmentRecord) {
    if b.read_name.is_empty() {
        b.read_name = a.read_name.clone();
    }

    set_mate(a, b);
    set_mate(b, a);

    if !a.is_unmapped() && !b.is_unmapped() && a.sequence_id == b.sequence_id {
        let left = a.alignment_start.min(b.alignment_start);
        let right = a.alignment_end().max(b.alignment_end());
        let size = right - left + 1;
        if a.alignment_start <= b.alignment_start {
            a.template_size = size;
            b.template_size = -size;
        } else {
            a.template_size = -size;
            b.template_size = size;
        }
    }
}

fn set_mate(record: &mut AlignmentRecord, mate: &AlignmentRecord) {
    record.mate = Some(MateInfo {
        sequence_id: mate.sequence_id,
        alignment_start: mate.alignment_start,
    });
    if mate.flags & FLAG_REVERSE != 0 {
        record.flags |= FLAG_MATE_REVERSE;
    }
    if mate.is_unmapped() {
        record.flags |= FLAG_MATE_UNMAPPED;
    }
}

/// Reference bases starting at a 1-based position, upper-cased.
struct ReferenceSpan {
    start: i64,
    bases: Vec<u8>,
}

impl ReferenceSpan {
    fn base(&self, pos: i64) -> Result<u8> {
        usize::try_from(pos - self.start)
            .ok()
            .and_then(|i| self.bases.get(i))
            .copied()
            .ok_or_else(|| {
                Error::ReferenceFetch(format!(
                    "reference position {} outside fetched span starting at {} ({} bases)",
                    pos,
                    self.start,
                    self.bases.len()
                ))
            })
    }
}

/// Fetch `len` reference bases starting at the 1-based `start`.
async fn fetch_reference(
    provider: &dyn SequenceProvider,
    sequence_id: i32,
    start: i64,
    len: i64,
) -> Result<ReferenceSpan> {
    let (begin, len) = match (u64::try_from(start - 1), u64::try_from(len)) {
        (Ok(begin), Ok(len)) => (begin, len),
        _ => {
            return Err(Error::Decode(format!(
                "invalid reference span: start {}, length {}",
                start, len
            )));
        }
    };
    let end = begin + len;

    let mut bases = provider
        .get_residues(sequence_id, begin, end)
        .await
        .map_err(|e| match e {
            Error::ReferenceFetch(_) => e,
            e => Error::ReferenceFetch(format!(
                "sequence {} [{}, {}): {}",
                sequence_id, begin, end, e
            )),
        })?;

    if (bases.len() as u64) < len {
        return Err(Error::ReferenceFetch(format!(
            "sequence {} returned {} of {} bases for [{}, {})",
            sequence_id,
            bases.len(),
            len,
            begin,
            end
        )));
    }
    bases.truncate(len as usize);
    bases.make_ascii_uppercase();

    Ok(ReferenceSpan { start, bases })
}

/// Apply a record's read features to the reference. Positions not covered
/// by any feature copy the reference; without a reference they read `N`.
fn build_sequence(
    record: &AlignmentRecord,
    reference: Option<&ReferenceSpan>,
    matrix: &SubstitutionMatrix,
) -> Result<Vec<u8>> {
    let read_length = record.read_length as usize;
    let mut sequence = Vec::with_capacity(read_length.min(MAX_PREALLOCATION));
    let mut ref_pos = record.alignment_start;
    let ref_base = |pos: i64| match reference {
        Some(reference) => reference.base(pos),
        None => Ok(b'N'),
    };

    for feature in &record.read_features {
        let read_index = (feature.pos_in_read as i64 - 1).max(0) as usize;
        while sequence.len() < read_index.min(read_length) {
            sequence.push(ref_base(ref_pos)?);
            ref_pos += 1;
        }

        match &feature.data {
            FeatureData::SubstitutionCode(code) => {
                sequence.push(matrix.get(ref_base(ref_pos)?, *code));
            }
            FeatureData::BaseAndScore { base, .. } | FeatureData::Base(base) => sequence.push(*base),
            FeatureData::Bases(bases) => sequence.extend_from_slice(bases),
            FeatureData::Length(_) | FeatureData::Scores(_) | FeatureData::Score(_) => {}
        }
        ref_pos += feature.ref_len();
    }

    while sequence.len() < read_length {
        sequence.push(ref_base(ref_pos)?);
        ref_pos += 1;
    }

    if sequence.len() != read_length {
        return Err(Error::Decode(format!(
            "read features of {} produce {} bases for a read of length {}",
            record.read_name,
            sequence.len(),
            read_length
        )));
    }

    Ok(sequence)
}

/// Quality scores carried by read features, for records without a stored
/// quality array. Unset positions are `0xff`.
fn feature_scores(record: &AlignmentRecord) -> Option<Vec<u8>> {
    let carries_scores = record.read_features.iter().any(|f| {
        matches!(
            f.data,
            FeatureData::BaseAndScore { .. } | FeatureData::Score(_) | FeatureData::Scores(_)
        )
    });
    if !record.quality_scores.is_empty() || !carries_scores {
        return None;
    }

    let mut scores = vec![0xff; record.read_length as usize];
    for feature in &record.read_features {
        let index = (feature.pos_in_read as usize).saturating_sub(1);
        match &feature.data {
            FeatureData::BaseAndScore { score, .. } | FeatureData::Score(score) => {
                if let Some(slot) = scores.get_mut(index) {
                    *slot = *score;
                }
            }
            FeatureData::Scores(run) => {
                for (slot, score) in scores.iter_mut().skip(index).zip(run) {
                    *slot = *score;
                }
            }
            _ => {}
        }
    }
    Some(scores)
}

fn verify_reference_md5(slice: &Slice, reference: &ReferenceSpan) -> Result<()> {
    let digest = Md5::digest(&reference.bases);
    if digest.as_slice() != &slice.header.reference_md5[..] {
        return Err(Error::CorruptBlock(format!(
            "slice reference MD5 mismatch for sequence {} at {}",
            slice.header.reference_sequence_id, slice.header.alignment_start
        )));
    }
    Ok(())
}

/// Decode a slice's records and rebuild their read bases.
///
/// The reference span of a single-reference slice is fetched once; slices
/// spanning several references fetch per record.
pub async fn reconstruct(
    slice: &Slice,
    provider: &dyn SequenceProvider,
    verify_md5: bool,
) -> Result<Vec<AlignmentRecord>> {
    let mut records = decode_records(slice)?;
    let preservation = &slice.compression_header.preservation_map;
    let matrix = &preservation.substitution_matrix;

    for record in records.iter_mut() {
        if let Some(scores) = feature_scores(record) {
            record.quality_scores = scores;
        }
    }

    if !records.iter().any(AlignmentRecord::needs_reference) {
        return Ok(records);
    }

    let header = &slice.header;
    let shared_reference = if !preservation.reference_required || header.is_multi_reference() {
        None
    } else if let Some(bases) = slice.embedded_reference() {
        Some(ReferenceSpan {
            start: header.alignment_start as i64,
            bases: bases.to_ascii_uppercase(),
        })
    } else {
        let reference = fetch_reference(
            provider,
            header.reference_sequence_id,
            header.alignment_start as i64,
            header.alignment_span as i64,
        )
        .await?;
        if verify_md5 && header.has_reference_md5() {
            verify_reference_md5(slice, &reference)?;
        }
        Some(reference)
    };

    for record in records.iter_mut() {
        if !record.needs_reference() {
            continue;
        }

        let own_reference;
        let reference = if !preservation.reference_required {
            None
        } else if let Some(reference) = &shared_reference {
            Some(reference)
        } else {
            own_reference = fetch_reference(
                provider,
                record.sequence_id,
                record.alignment_start,
                record.reference_span(),
            )
            .await?;
            Some(&own_reference)
        };

        record.sequence = build_sequence(record, reference, matrix)?;
    }

    tracing::trace!(
        records = records.len(),
        reference_sequence_id = header.reference_sequence_id,
        "reconstructed slice records"
    );

    Ok(records)
}
