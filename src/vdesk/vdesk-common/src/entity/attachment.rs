/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::types::{AttachmentId, AttachmentKey, MessageId, TicketId};

/// Metadata of a stored attachment; the bytes live in the blob store under
/// [`Attachment::file_path`].
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Attachment {
    ///
    pub id: AttachmentId,
    ///
    pub ticket_id: TicketId,
    ///
    pub message_id: Option<MessageId>,
    /// original file name as supplied by the uploader.
    pub file_name: String,
    /// opaque blob-store key.
    pub file_path: AttachmentKey,
    ///
    pub file_size: u64,
    ///
    pub mime_type: String,
    /// display identity of the uploader (user id or admin address).
    pub uploaded_by: String,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}
