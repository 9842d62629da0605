//! S3 XML response builders and request parsers.
//!
//! Responses are hand-built strings in the S3 namespace; request bodies
//! (multi-object delete, complete-multipart) parse through quick-xml.

use crate::acl::S3_XMLNS;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::dates::xml_time;

/// Escape special XML characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ============================================================================
// ListBuckets
// ============================================================================

#[derive(Debug, Clone)]
pub struct BucketEntry {
    pub name: String,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ListBucketsResult {
    pub owner_id: String,
    pub owner_display_name: String,
    pub buckets: Vec<BucketEntry>,
}

impl ListBucketsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListAllMyBucketsResult xmlns="{}">"#, S3_XMLNS));
        xml.push('\n');

        xml.push_str("  <Owner>\n");
        xml.push_str(&format!("    <ID>{}</ID>\n", escape_xml(&self.owner_id)));
        xml.push_str(&format!(
            "    <DisplayName>{}</DisplayName>\n",
            escape_xml(&self.owner_display_name)
        ));
        xml.push_str("  </Owner>\n");

        xml.push_str("  <Buckets>\n");
        for bucket in &self.buckets {
            xml.push_str("    <Bucket>\n");
            xml.push_str(&format!("      <Name>{}</Name>\n", escape_xml(&bucket.name)));
            xml.push_str(&format!(
                "      <CreationDate>{}</CreationDate>\n",
                xml_time(&bucket.creation_date)
            ));
            xml.push_str("    </Bucket>\n");
        }
        xml.push_str("  </Buckets>\n");

        xml.push_str("</ListAllMyBucketsResult>");
        xml
    }
}

// ============================================================================
// ListObjects (v1)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub size: u64,
    pub owner_id: String,
    pub owner_display_name: String,
}

#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub marker: String,
    pub max_keys: usize,
    pub delimiter: Option<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub contents: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
}

impl ListBucketResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListBucketResult xmlns="{}">"#, S3_XMLNS));
        xml.push('\n');

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        if !self.prefix.is_empty() {
            xml.push_str(&format!("  <Prefix>{}</Prefix>\n", escape_xml(&self.prefix)));
        }
        xml.push_str(&format!("  <Marker>{}</Marker>\n", escape_xml(&self.marker)));
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));
        if let Some(delim) = &self.delimiter {
            xml.push_str(&format!("  <Delimiter>{}</Delimiter>\n", escape_xml(delim)));
        }
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        if let Some(next) = &self.next_marker {
            xml.push_str(&format!("  <NextMarker>{}</NextMarker>\n", escape_xml(next)));
        }

        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&obj.key)));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                xml_time(&obj.last_modified)
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&obj.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str("    <Owner>\n");
            xml.push_str(&format!("      <ID>{}</ID>\n", escape_xml(&obj.owner_id)));
            xml.push_str(&format!(
                "      <DisplayName>{}</DisplayName>\n",
                escape_xml(&obj.owner_display_name)
            ));
            xml.push_str("    </Owner>\n");
            xml.push_str("  </Contents>\n");
        }

        for prefix in &self.common_prefixes {
            xml.push_str("  <CommonPrefixes>\n");
            xml.push_str(&format!("    <Prefix>{}</Prefix>\n", escape_xml(prefix)));
            xml.push_str("  </CommonPrefixes>\n");
        }

        xml.push_str("</ListBucketResult>");
        xml
    }
}

// ============================================================================
// GetBucketLogging
// ============================================================================

pub fn bucket_logging_status_xml() -> String {
    format!(
        "{}\n<BucketLoggingStatus xmlns=\"{}\"/>",
        r#"<?xml version="1.0" encoding="UTF-8"?>"#, S3_XMLNS
    )
}

// ============================================================================
// CopyObject
// ============================================================================

#[derive(Debug, Clone)]
pub struct CopyObjectResult {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyObjectResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyObjectResult xmlns="{}">
  <LastModified>{}</LastModified>
  <ETag>{}</ETag>
</CopyObjectResult>"#,
            S3_XMLNS,
            xml_time(&self.last_modified),
            escape_xml(&self.etag),
        )
    }
}

// ============================================================================
// DeleteObjects (multi-object delete) — streamed envelope
// ============================================================================

/// Delete request object
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
}

/// Delete request body
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "Quiet")]
    pub quiet: Option<bool>,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

impl DeleteRequest {
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// The multi-object delete response is streamed: open the envelope, emit
/// one fragment per key as its deletion resolves, close the envelope.
pub fn delete_result_open() -> String {
    format!(
        "{}\n<DeleteResult xmlns=\"{}\">\n",
        r#"<?xml version="1.0" encoding="UTF-8"?>"#, S3_XMLNS
    )
}

pub fn delete_result_deleted(key: &str) -> String {
    format!("  <Deleted><Key>{}</Key></Deleted>\n", escape_xml(key))
}

pub fn delete_result_error(key: &str, code: &str, message: &str) -> String {
    format!(
        "  <Error><Key>{}</Key><Code>{}</Code><Message>{}</Message></Error>\n",
        escape_xml(key),
        escape_xml(code),
        escape_xml(message)
    )
}

pub fn delete_result_close() -> String {
    "</DeleteResult>".to_string()
}

// ============================================================================
// Multipart upload
// ============================================================================

/// Part in a CompleteMultipartUpload request
#[derive(Debug, Clone, Deserialize)]
pub struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// CompleteMultipartUpload request body
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteMultipartUploadRequest {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePart>,
}

impl CompleteMultipartUploadRequest {
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="{}">
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <UploadId>{}</UploadId>
</InitiateMultipartUploadResult>"#,
            S3_XMLNS,
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.upload_id),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

impl CompleteMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="{}">
  <Location>{}</Location>
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <ETag>{}</ETag>
</CompleteMultipartUploadResult>"#,
            S3_XMLNS,
            escape_xml(&self.location),
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.etag),
        )
    }
}

/// ListParts response
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: u32,
    pub max_parts: usize,
    pub is_truncated: bool,
    pub owner_id: String,
    pub owner_display_name: String,
    pub parts: Vec<crate::multipart::PartInfo>,
}

impl ListPartsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<ListPartsResult xmlns="{}">"#, S3_XMLNS));
        xml.push('\n');
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!(
            "  <UploadId>{}</UploadId>\n",
            escape_xml(&self.upload_id)
        ));
        xml.push_str("  <StorageClass>STANDARD</StorageClass>\n");
        xml.push_str(&format!(
            "  <PartNumberMarker>{}</PartNumberMarker>\n",
            self.part_number_marker
        ));
        xml.push_str(&format!(
            "  <NextPartNumberMarker>{}</NextPartNumberMarker>\n",
            self.next_part_number_marker
        ));
        xml.push_str(&format!("  <MaxParts>{}</MaxParts>\n", self.max_parts));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        xml.push_str("  <Initiator>\n");
        xml.push_str(&format!("    <ID>{}</ID>\n", escape_xml(&self.owner_id)));
        xml.push_str(&format!(
            "    <DisplayName>{}</DisplayName>\n",
            escape_xml(&self.owner_display_name)
        ));
        xml.push_str("  </Initiator>\n");
        xml.push_str("  <Owner>\n");
        xml.push_str(&format!("    <ID>{}</ID>\n", escape_xml(&self.owner_id)));
        xml.push_str(&format!(
            "    <DisplayName>{}</DisplayName>\n",
            escape_xml(&self.owner_display_name)
        ));
        xml.push_str("  </Owner>\n");

        for part in &self.parts {
            xml.push_str("  <Part>\n");
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                xml_time(&part.last_modified)
            ));
            xml.push_str(&format!(
                "    <PartNumber>{}</PartNumber>\n",
                part.part_number
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&part.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", part.size));
            xml.push_str("  </Part>\n");
        }

        xml.push_str("</ListPartsResult>");
        xml
    }
}

/// ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsResult {
    pub bucket: String,
    pub prefix: String,
    pub max_uploads: usize,
    pub is_truncated: bool,
    pub uploads: Vec<crate::multipart::UploadInfo>,
}

impl ListMultipartUploadsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(
            r#"<ListMultipartUploadsResult xmlns="{}">"#,
            S3_XMLNS
        ));
        xml.push('\n');
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str("  <KeyMarker/>\n");
        xml.push_str("  <UploadIdMarker/>\n");
        if !self.prefix.is_empty() {
            xml.push_str(&format!("  <Prefix>{}</Prefix>\n", escape_xml(&self.prefix)));
        }
        xml.push_str(&format!("  <MaxUploads>{}</MaxUploads>\n", self.max_uploads));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for upload in &self.uploads {
            xml.push_str("  <Upload>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&upload.key)));
            xml.push_str(&format!(
                "    <UploadId>{}</UploadId>\n",
                escape_xml(&upload.upload_id)
            ));
            xml.push_str("    <Initiator>\n");
            xml.push_str(&format!(
                "      <ID>{}</ID>\n",
                escape_xml(&upload.initiator_id)
            ));
            xml.push_str(&format!(
                "      <DisplayName>{}</DisplayName>\n",
                escape_xml(&upload.initiator_display)
            ));
            xml.push_str("    </Initiator>\n");
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str(&format!(
                "    <Initiated>{}</Initiated>\n",
                xml_time(&upload.initiated)
            ));
            xml.push_str("  </Upload>\n");
        }

        xml.push_str("</ListMultipartUploadsResult>");
        xml
    }
}
