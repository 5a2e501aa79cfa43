//! Integration tests for the content stream codec.

use overcrypt_core::cipher::Cipher;
use overcrypt_core::fs::size::{CHUNK_ENCRYPTED_SIZE, CHUNK_PLAINTEXT_SIZE, HEADER_SIZE};
use overcrypt_core::fs::{
    NameEncoding, NameEncryptionMode, PhysicalRange, RangeRequest, StreamingError, encrypted_size,
};

mod common;
use common::{VecOpener, byte_stream, collect, create_sized_content, standard_cipher};

// ============================================================================
// Helper Functions
// ============================================================================

async fn encrypt(content: &[u8]) -> Vec<u8> {
    let cipher = standard_cipher();
    collect(cipher.encrypt_stream(byte_stream(content, 5000)))
        .await
        .expect("encryption failed")
}

async fn read_range(ciphertext: Vec<u8>, request: RangeRequest) -> (Vec<u8>, Vec<PhysicalRange>) {
    let cipher = standard_cipher();
    let opener = VecOpener::new(ciphertext);
    let stream = cipher
        .decrypt_range(opener.clone(), request)
        .await
        .expect("failed to open range");
    let data = collect(stream).await.expect("failed to read range");
    (data, opener.opened())
}

const CHUNK: u64 = CHUNK_PLAINTEXT_SIZE as u64;
const ENC_CHUNK: u64 = CHUNK_ENCRYPTED_SIZE as u64;
const HEADER: u64 = HEADER_SIZE as u64;

// ============================================================================
// Whole-file behaviour
// ============================================================================

#[tokio::test]
async fn test_ciphertext_length_matches_size_mapping() {
    for size in [0usize, 1, 32767, 32768, 32769, 65536, 100_000] {
        let content = create_sized_content(size);
        let ciphertext = encrypt(&content).await;
        assert_eq!(ciphertext.len() as u64, encrypted_size(size as u64), "size {size}");

        let (plain, _) = read_range(ciphertext, RangeRequest::full()).await;
        assert_eq!(plain, content, "size {size}");
    }
}

#[tokio::test]
async fn test_encryption_is_randomized() {
    let content = create_sized_content(1000);
    assert_ne!(encrypt(&content).await, encrypt(&content).await);
}

#[tokio::test]
async fn test_input_piece_size_does_not_matter() {
    let content = create_sized_content(70_000);
    let cipher = standard_cipher();
    for piece in [1usize, 7, 32768, 70_000] {
        let ciphertext = collect(cipher.encrypt_stream(byte_stream(&content, piece))).await.unwrap();
        let (plain, _) = read_range(ciphertext, RangeRequest::full()).await;
        assert_eq!(plain, content, "piece {piece}");
    }
}

// ============================================================================
// Range reads
// ============================================================================

#[tokio::test]
async fn test_range_opens_header_then_covering_chunk_only() {
    let content = create_sized_content(100_000);
    let ciphertext = encrypt(&content).await;

    let (data, opened) = read_range(ciphertext, RangeRequest::new(40_000, 10)).await;
    assert_eq!(data, &content[40_000..40_010]);
    assert_eq!(
        opened,
        vec![
            PhysicalRange::header(),
            PhysicalRange::new(HEADER + ENC_CHUNK, Some(ENC_CHUNK)),
        ]
    );
}

#[tokio::test]
async fn test_range_across_chunk_boundary() {
    let content = create_sized_content(100_000);
    let ciphertext = encrypt(&content).await;

    let start = CHUNK - 8;
    let (data, opened) = read_range(ciphertext, RangeRequest::new(start, 20)).await;
    assert_eq!(data, &content[start as usize..start as usize + 20]);
    assert_eq!(opened[1], PhysicalRange::new(HEADER, Some(2 * ENC_CHUNK)));
}

#[tokio::test]
async fn test_range_to_end() {
    let content = create_sized_content(100_000);
    let ciphertext = encrypt(&content).await;

    let (data, opened) = read_range(ciphertext, RangeRequest::to_end(70_000)).await;
    assert_eq!(data, &content[70_000..]);
    assert_eq!(opened[1], PhysicalRange::new(HEADER + 2 * ENC_CHUNK, None));
}

#[tokio::test]
async fn test_range_past_end_is_truncated() {
    let content = create_sized_content(100_000);
    let ciphertext = encrypt(&content).await;

    let (data, _) = read_range(ciphertext.clone(), RangeRequest::new(99_990, 100)).await;
    assert_eq!(data, &content[99_990..]);

    let (data, _) = read_range(ciphertext, RangeRequest::new(100_005, 10)).await;
    assert!(data.is_empty());
}

#[tokio::test]
async fn test_range_near_u64_limit_is_empty() {
    let content = create_sized_content(100_000);
    let ciphertext = encrypt(&content).await;

    let (data, opened) = read_range(ciphertext.clone(), RangeRequest::new(u64::MAX - 10, 100)).await;
    assert!(data.is_empty());
    assert_eq!(opened[1], PhysicalRange::new(u64::MAX, Some(ENC_CHUNK)));

    let (data, opened) = read_range(ciphertext, RangeRequest::to_end(u64::MAX)).await;
    assert!(data.is_empty());
    assert_eq!(opened[1], PhysicalRange::new(u64::MAX, None));
}

#[tokio::test]
async fn test_empty_request_opens_nothing() {
    let ciphertext = encrypt(b"hello").await;
    let (data, opened) = read_range(ciphertext, RangeRequest::new(2, 0)).await;
    assert!(data.is_empty());
    assert!(opened.is_empty());
}

#[tokio::test]
async fn test_empty_file_reads_empty() {
    let ciphertext = encrypt(b"").await;
    assert_eq!(ciphertext.len(), 96);
    let (data, _) = read_range(ciphertext, RangeRequest::full()).await;
    assert!(data.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_tampered_chunk_fails_only_that_chunk() {
    let content = create_sized_content(100_000);
    let mut ciphertext = encrypt(&content).await;
    // Flip a ciphertext byte inside chunk 1
    let index = (HEADER + ENC_CHUNK + 100) as usize;
    ciphertext[index] ^= 0x01;

    let (data, _) = read_range(ciphertext.clone(), RangeRequest::new(0, 100)).await;
    assert_eq!(data, &content[..100]);

    let cipher = standard_cipher();
    let stream = cipher
        .decrypt_range(VecOpener::new(ciphertext), RangeRequest::new(CHUNK + 5, 10))
        .await
        .unwrap();
    let err = collect(stream).await.unwrap_err();
    assert!(matches!(
        StreamingError::from_io(&err),
        Some(StreamingError::ChunkDecryptionFailed { chunk_number: 1, .. })
    ));
}

#[tokio::test]
async fn test_wrong_key_fails_at_header() {
    let ciphertext = encrypt(b"secret").await;
    let other = overcrypt_core::cipher::AeadCipher::new(
        overcrypt_core::crypto::keys::CipherKeys::from_bytes(&[9u8; 96]),
        overcrypt_core::cipher::CipherSettings {
            mode: NameEncryptionMode::Standard,
            encoding: NameEncoding::Base64,
            directory_name_encryption: false,
        },
    );
    let result = other.decrypt_range(VecOpener::new(ciphertext), RangeRequest::full()).await;
    assert!(matches!(result, Err(StreamingError::Header(_))));
}

#[tokio::test]
async fn test_truncated_header_is_too_small() {
    let ciphertext = encrypt(b"secret").await;
    let cipher = standard_cipher();
    let result = cipher
        .decrypt_range(VecOpener::new(ciphertext[..40].to_vec()), RangeRequest::full())
        .await;
    assert!(matches!(result, Err(StreamingError::FileTooSmall { actual: 40, .. })));
}

#[tokio::test]
async fn test_truncated_final_chunk_is_reported() {
    let content = create_sized_content(1000);
    let ciphertext = encrypt(&content).await;
    let truncated = ciphertext[..ciphertext.len() - 20].to_vec();

    let cipher = standard_cipher();
    let stream = cipher.decrypt_range(VecOpener::new(truncated), RangeRequest::full()).await.unwrap();
    assert!(collect(stream).await.is_err());
}
