//! SPIR-V header validation
//!
//! Checks the five-word module header before any instruction is decoded.
//! Failures here are reported with better messages than a generic
//! truncation error further down the pipeline.

use spirv::Word;

use crate::error::ReflectError;

/// Number of words in the module header.
pub const HEADER_WORDS: usize = 5;

/// Decoded module header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: (u8, u8),
    pub generator: Generator,
    /// Every result id in the module is below this value.
    pub bound: u32,
    pub schema: u32,
}

/// Tool that produced the module (header word 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generator {
    pub tool: u16,
    pub version: u16,
}

impl Generator {
    pub fn from_word(word: Word) -> Self {
        Generator {
            tool: (word >> 16) as u16,
            version: (word & 0xFFFF) as u16,
        }
    }

    /// Name of a registered generator tool, if it is a well-known one.
    pub fn tool_name(&self) -> Option<&'static str> {
        let name = match self.tool {
            0 => "Khronos",
            1 => "LunarG",
            2 => "Valve",
            3 => "Codeplay",
            4 => "NVIDIA",
            5 => "ARM",
            6 => "LLVM/SPIR-V Translator",
            7 => "SPIR-V Tools Assembler",
            8 => "Glslang Reference Front End",
            9 => "Qualcomm",
            10 => "AMD",
            11 => "Intel",
            12 => "Imagination",
            13 => "Google Shaderc over Glslang",
            14 => "Google spiregg",
            15 => "Google rspirv",
            17 => "SPIR-V Tools Linker",
            _ => return None,
        };
        Some(name)
    }
}

/// Validate and decode the SPIR-V header from words.
///
/// Performs basic sanity checks:
/// - Minimum length (5 words)
/// - Magic number (0x07230203), reporting byte-swapped input separately
/// - Version compatibility (1.0 - 1.6)
/// - Non-zero bound
///
/// # Errors
///
/// Returns `ReflectError::MalformedInput` at byte offset 0 describing the
/// first failed check.
pub fn parse_header(words: &[Word]) -> Result<Header, ReflectError> {
    if words.len() < HEADER_WORDS {
        return Err(ReflectError::malformed(
            0,
            format!(
                "SPIR-V too small: {} words (minimum {})",
                words.len(),
                HEADER_WORDS
            ),
        ));
    }

    let magic = words[0];
    if magic != spirv::MAGIC_NUMBER {
        let reason = if magic.swap_bytes() == spirv::MAGIC_NUMBER {
            "SPIR-V is big-endian (byte-swapped magic)".to_string()
        } else {
            format!(
                "Invalid SPIR-V magic: 0x{:08x} (expected 0x{:08x})",
                magic,
                spirv::MAGIC_NUMBER
            )
        };
        return Err(ReflectError::malformed(0, reason));
    }

    let major = ((words[1] >> 16) & 0xFF) as u8;
    let minor = ((words[1] >> 8) & 0xFF) as u8;
    if major != 1 || minor > 6 {
        return Err(ReflectError::malformed(
            4,
            format!(
                "Unsupported SPIR-V version: {}.{} (supported: 1.0-1.6)",
                major, minor
            ),
        ));
    }

    let bound = words[3];
    if bound == 0 {
        return Err(ReflectError::malformed(12, "SPIR-V bound is 0 (invalid)"));
    }

    let header = Header {
        version: (major, minor),
        generator: Generator::from_word(words[2]),
        bound,
        schema: words[4],
    };

    log::trace!(
        "SPIR-V header: version {}.{}, bound {}, {} words",
        major,
        minor,
        bound,
        words.len()
    );

    Ok(header)
}

/// Validate SPIR-V binary structure from raw little-endian bytes.
///
/// # Arguments
///
/// * `bytes` - Raw SPIR-V binary
///
/// # Returns
///
/// * `Ok(Header)` if basic structure is valid
/// * `Err(ReflectError::MalformedInput)` describing the problem otherwise
///
/// # Note
///
/// This is NOT a full SPIR-V validator. Use spirv-val for complete validation.
pub fn validate_spirv(bytes: &[u8]) -> Result<Header, ReflectError> {
    if bytes.len() < HEADER_WORDS * 4 {
        return Err(ReflectError::malformed(
            0,
            format!("SPIR-V too small: {} bytes (minimum 20)", bytes.len()),
        ));
    }

    if bytes.len() % 4 != 0 {
        return Err(ReflectError::malformed(
            bytes.len() - bytes.len() % 4,
            format!("SPIR-V size ({}) not 4-byte aligned", bytes.len()),
        ));
    }

    let header: Vec<Word> = bytes[..HEADER_WORDS * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    parse_header(&header)
}

/// Check if bytes look like SPIR-V (quick magic check).
///
/// Useful for fast rejection of obviously wrong data.
#[inline]
pub fn is_spirv(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0..4] == [0x03, 0x02, 0x23, 0x07]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn make_valid_spirv() -> Vec<u8> {
        // Version word layout: minor in bits 8-15, major in bits 16-23
        vec![
            0x03, 0x02, 0x23, 0x07, // Magic (0x07230203 in LE)
            0x00, 0x00, 0x01, 0x00, // Version 1.0
            0x0B, 0x00, 0x08, 0x00, // Generator: tool 8, version 11
            0x01, 0x00, 0x00, 0x00, // Bound = 1
            0x00, 0x00, 0x00, 0x00, // Schema
        ]
    }

    fn reason(err: ReflectError) -> String {
        match err {
            ReflectError::MalformedInput { reason, .. } => reason,
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_spirv_header() {
        let header = validate_spirv(&make_valid_spirv()).unwrap();
        assert_eq!(header.version, (1, 0));
        assert_eq!(header.bound, 1);
        assert_eq!(header.generator, Generator { tool: 8, version: 11 });
        assert_eq!(header.generator.tool_name(), Some("Glslang Reference Front End"));
    }

    #[test]
    fn test_invalid_magic() {
        let mut spirv = make_valid_spirv();
        spirv[0] = 0x00;
        let err = validate_spirv(&spirv).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(reason(err).contains("magic"));
    }

    #[test]
    fn test_byte_swapped_magic() {
        let mut spirv = make_valid_spirv();
        spirv[0..4].copy_from_slice(&[0x07, 0x23, 0x02, 0x03]);
        assert!(reason(validate_spirv(&spirv).unwrap_err()).contains("big-endian"));
    }

    #[test]
    fn test_too_small() {
        let err = validate_spirv(&[0x03, 0x02, 0x23, 0x07]).unwrap_err();
        assert!(reason(err).contains("too small"));

        let err = parse_header(&[spirv::MAGIC_NUMBER, 0x0001_0000]).unwrap_err();
        assert!(reason(err).contains("too small"));
    }

    #[test]
    fn test_not_aligned() {
        let mut spirv = make_valid_spirv();
        spirv.push(0x00);
        let err = validate_spirv(&spirv).unwrap_err();
        assert_eq!(err.offset(), Some(20));
        let text = reason(err);
        assert!(text.contains("aligned"), "Expected alignment error, got: {}", text);
    }

    #[test]
    fn test_zero_bound() {
        let mut spirv = make_valid_spirv();
        spirv[12..16].copy_from_slice(&[0, 0, 0, 0]);
        let err = validate_spirv(&spirv).unwrap_err();
        assert_eq!(err.offset(), Some(12));
        assert!(reason(err).contains("bound"));
    }

    #[test]
    fn test_is_spirv_quick_check() {
        assert!(is_spirv(&[0x03, 0x02, 0x23, 0x07]));
        assert!(!is_spirv(&[0x00, 0x00, 0x00, 0x00]));
        assert!(!is_spirv(&[0x03, 0x02, 0x23]));
    }

    #[test]
    fn test_version_range() {
        let mut spirv = make_valid_spirv();

        spirv[5] = 0x06;
        let header = validate_spirv(&spirv).unwrap();
        assert_eq!(header.version, (1, 6));

        spirv[5] = 0x07;
        assert!(validate_spirv(&spirv).is_err());

        spirv[5] = 0x00;
        spirv[6] = 0x02;
        assert!(validate_spirv(&spirv).is_err());
    }

    #[test]
    fn test_unknown_generator_has_no_name() {
        assert_eq!(Generator::from_word(0xBEEF_0001).tool_name(), None);
        assert_eq!(Generator::from_word(0xBEEF_0001).version, 1);
    }
}
