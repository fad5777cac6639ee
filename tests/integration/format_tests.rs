//! Format-specific integration tests.
//!
//! Tests verify:
//! - TIFF decoding in both byte orders, classic and BigTIFF
//! - TIFF axis interpretation from JSON and ImageJ descriptions
//! - PTU and SDT files decode to (channel, bin, y, x) with metadata
//! - Extension resolution on real folders

use flim_stack::error::{DecodeError, StackError, TiffError};
use flim_stack::format::{detect_input, resolve_extension, ChannelMetadata, FlimFormat, InputKind};
use flim_stack::DType;

use super::test_utils::{
    folder_with, one_line_ptu, sdt_file, tiff_u16, ByteOrderType, StackTiffBuilder,
};

fn read(format: FlimFormat, name: &str, data: Vec<u8>) -> Result<flim_stack::SliceSample, DecodeError> {
    let (_root, folder) = folder_with("files", &[(name, data)]);
    format.read(&folder.join(name))
}

// =============================================================================
// TIFF Byte Order Tests
// =============================================================================

fn two_page_tiff(order: ByteOrderType, bigtiff: bool) -> Vec<u8> {
    StackTiffBuilder::new(3, 2)
        .with_byte_order(order)
        .with_bigtiff(bigtiff)
        .add_page_u16(&[1, 2, 3, 4, 5, 6])
        .add_page_u16(&[10, 20, 30, 40, 50, 60])
        .build()
}

#[test]
fn test_little_endian_tiff() {
    let data = two_page_tiff(ByteOrderType::LittleEndian, false);
    assert_eq!(&data[..2], b"II");

    let sample = read(FlimFormat::Tiff, "le.tif", data).unwrap();
    assert_eq!(sample.shape(), [1, 2, 2, 3]);
    assert_eq!(sample.dtype(), DType::U16);
    let view = sample.data.view::<u16>().unwrap();
    assert_eq!(view[[0, 0, 1, 2]], 6);
    assert_eq!(view[[0, 1, 0, 1]], 20);
}

#[test]
fn test_big_endian_tiff() {
    let data = two_page_tiff(ByteOrderType::BigEndian, false);
    assert_eq!(&data[..2], b"MM");

    let sample = read(FlimFormat::Tiff, "be.tif", data).unwrap();
    let view = sample.data.view::<u16>().unwrap();
    assert_eq!(view[[0, 0, 1, 2]], 6);
    assert_eq!(view[[0, 1, 1, 0]], 40);
}

#[test]
fn test_bigtiff_both_byte_orders() {
    for order in [ByteOrderType::LittleEndian, ByteOrderType::BigEndian] {
        let sample = read(FlimFormat::Tiff, "big.tif", two_page_tiff(order, true)).unwrap();
        assert_eq!(sample.shape(), [1, 2, 2, 3], "{:?}", order);
        let view = sample.data.view::<u16>().unwrap();
        assert_eq!(view[[0, 1, 1, 2]], 60, "{:?}", order);
    }
}

#[test]
fn test_tiff_element_types() {
    let bytes = StackTiffBuilder::new(2, 1).add_page_u8(&[7, 9]).build();
    let sample = read(FlimFormat::Tiff, "u8.tif", bytes).unwrap();
    assert_eq!(sample.dtype(), DType::U8);
    assert_eq!(sample.data.view::<u8>().unwrap()[[0, 0, 0, 1]], 9);

    let floats = StackTiffBuilder::new(2, 1)
        .with_byte_order(ByteOrderType::BigEndian)
        .add_page_f32(&[0.25, -1.5])
        .build();
    let sample = read(FlimFormat::Tiff, "f32.tif", floats).unwrap();
    assert_eq!(sample.dtype(), DType::F32);
    assert_eq!(sample.data.view::<f32>().unwrap()[[0, 0, 0, 1]], -1.5);
}

// =============================================================================
// TIFF Axis Tests
// =============================================================================

#[test]
fn test_tiff_json_shape_description() {
    let value = |c: usize, b: usize, y: usize, x: usize| (1000 * c + 100 * b + 10 * y + x) as u16;
    let sample = read(FlimFormat::Tiff, "json.tif", tiff_u16([2, 3, 2, 2], value)).unwrap();
    assert_eq!(sample.shape(), [2, 3, 2, 2]);
    assert_eq!(sample.metadata, vec![ChannelMetadata::Tiff; 2]);
    let view = sample.data.view::<u16>().unwrap();
    assert_eq!(view[[1, 2, 1, 0]], 1210);
    assert_eq!(view[[0, 1, 0, 1]], 101);
}

#[test]
fn test_tiff_imagej_interleaved_channels() {
    // Pages: (bin0, c0) (bin0, c1) (bin1, c0) (bin1, c1)
    let bytes = StackTiffBuilder::new(1, 1)
        .with_description("ImageJ=1.53t\nimages=4\nchannels=2\nslices=2\n")
        .add_page_u16(&[1])
        .add_page_u16(&[2])
        .add_page_u16(&[3])
        .add_page_u16(&[4])
        .build();
    let sample = read(FlimFormat::Tiff, "ij.tif", bytes).unwrap();
    assert_eq!(sample.shape(), [2, 2, 1, 1]);
    let view = sample.data.view::<u16>().unwrap();
    assert_eq!(view[[1, 0, 0, 0]], 2);
    assert_eq!(view[[0, 1, 0, 0]], 3);
}

#[test]
fn test_tiff_truncated_file() {
    let mut data = two_page_tiff(ByteOrderType::LittleEndian, false);
    data.truncate(20);
    let err = read(FlimFormat::Tiff, "cut.tif", data).unwrap_err();
    assert!(matches!(err, DecodeError::Tiff(_)));
}

#[test]
fn test_tiff_not_a_tiff() {
    let err = read(FlimFormat::Tiff, "text.tif", b"hello world, not a tiff".to_vec()).unwrap_err();
    assert!(matches!(err, DecodeError::Tiff(TiffError::InvalidMagic(_))));
}

// =============================================================================
// PTU and SDT Tests
// =============================================================================

#[test]
fn test_ptu_file_decodes() {
    let sample = read(FlimFormat::Ptu, "scan.ptu", one_line_ptu(4, 5)).unwrap();
    // 20 MHz sync with 25 ns bins gives 2 bins
    assert_eq!(sample.shape(), [1, 2, 1, 4]);
    assert_eq!(sample.dtype(), DType::U32);
    let view = sample.data.view::<u32>().unwrap();
    assert_eq!(view[[0, 1, 0, 0]], 5);
    assert_eq!(view.iter().sum::<u32>(), 5);
    assert_eq!(sample.metadata[0].file_type(), "ptu");
    assert_eq!(sample.metadata[0].laser_frequency_mhz(), Some(20.0));
}

#[test]
fn test_sdt_file_decodes() {
    let data = sdt_file(2, (2, 3, 4), |c, y, x, b| (c * 1000 + y * 100 + x * 10 + b) as u16);
    let sample = read(FlimFormat::Sdt, "decay.sdt", data).unwrap();
    assert_eq!(sample.shape(), [2, 4, 2, 3]);
    assert_eq!(sample.dtype(), DType::U16);
    let view = sample.data.view::<u16>().unwrap();
    assert_eq!(view[[1, 3, 1, 2]], 1123);
    assert_eq!(sample.metadata.len(), 2);
    assert_eq!(sample.metadata[1].laser_frequency_mhz(), Some(80.0));
}

#[test]
fn test_wrong_decoder_fails_cleanly() {
    let err = read(FlimFormat::Sdt, "really_a_ptu.sdt", one_line_ptu(2, 1)).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::InvalidMagic { .. } | DecodeError::InvalidHeader { .. } | DecodeError::Io(_)
    ));
}

// =============================================================================
// Extension Resolution Tests
// =============================================================================

#[test]
fn test_folder_resolves_to_dominant_extension() {
    let (_root, folder) = folder_with(
        "mixed",
        &[
            ("a_t0.sdt", Vec::new()),
            ("b_t1.sdt", Vec::new()),
            ("notes.txt", Vec::new()),
        ],
    );
    assert_eq!(resolve_extension(&folder).unwrap(), ".sdt");
    assert_eq!(
        detect_input(&folder).unwrap(),
        InputKind::Files(FlimFormat::Sdt)
    );
}

#[test]
fn test_store_directory_resolves_to_store() {
    let (_root, folder) = folder_with("run", &[]);
    let store = folder.join("run.zarr");
    std::fs::create_dir(&store).unwrap();
    assert_eq!(detect_input(&store).unwrap(), InputKind::Store);
}

#[test]
fn test_unsupported_folder() {
    let (_root, folder) = folder_with("docs", &[("a.csv", Vec::new()), ("b.csv", Vec::new())]);
    let err = detect_input(&folder).unwrap_err();
    assert!(matches!(err, StackError::UnrecognizedFormat { ref extension } if extension == ".csv"));
}
