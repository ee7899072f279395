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

use tokio::io::AsyncReadExt;
use vdesk_common::{
    entity::Attachment,
    types::{AttachmentId, AttachmentKey, MessageId, TicketId},
    BlobStore, Clock, Error, Requester, Store,
};
use vdesk_config::field::FieldAttachments;

/// Validates, authorizes and stores ticket attachments; the bytes live in
/// the blob store, the metadata in the datastore.
pub struct AttachmentCoordinator<S> {
    store: std::sync::Arc<S>,
    blob: std::sync::Arc<dyn BlobStore>,
    clock: std::sync::Arc<dyn Clock>,
    settings: FieldAttachments,
}

impl<S: Store> AttachmentCoordinator<S> {
    ///
    pub fn new(
        store: std::sync::Arc<S>,
        blob: std::sync::Arc<dyn BlobStore>,
        clock: std::sync::Arc<dyn Clock>,
        settings: FieldAttachments,
    ) -> Self {
        Self {
            store,
            blob,
            clock,
            settings,
        }
    }

    /// Read the stream (bounded by the size cap), store the bytes and the
    /// metadata row.
    ///
    /// # Errors
    ///
    /// * [`Error::Validation`] on oversize or disallowed media type
    /// * [`Error::Forbidden`] when the requester cannot touch the ticket
    #[tracing::instrument(skip(self, stream, requester), fields(ticket = %ticket_id, file = %file_name))]
    pub async fn upload(
        &self,
        ticket_id: TicketId,
        message_id: Option<MessageId>,
        file_name: &str,
        mime_type: &str,
        requester: &Requester,
        mut stream: impl tokio::io::AsyncRead + Send + Unpin,
    ) -> vdesk_common::Result<Attachment> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .filter(|ticket| !ticket.is_deleted)
            .ok_or_else(|| Error::not_found("ticket", ticket_id))?;
        if !requester.may_access(&ticket) {
            return Err(Error::Forbidden("not allowed on this ticket".to_owned()));
        }

        if !self
            .settings
            .allowed_mime
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
        {
            return Err(Error::Validation(format!(
                "media type '{mime_type}' is not allowed"
            )));
        }

        // read one byte past the cap so oversize is detected without
        // buffering an unbounded stream.
        let cap = self.settings.max_size_bytes;
        let mut data = Vec::new();
        let read = (&mut stream)
            .take(cap + 1)
            .read_to_end(&mut data)
            .await
            .map_err(|error| Error::Validation(format!("unreadable upload: {error}")))?;
        if read as u64 > cap {
            return Err(Error::Validation(format!(
                "attachment exceeds the {cap} byte limit"
            )));
        }

        let key = AttachmentKey::generate(ticket_id);
        self.blob
            .put(key.as_str(), data.clone())
            .await
            .map_err(|error| Error::Transient(error.to_string()))?;

        let attachment = Attachment {
            id: AttachmentId::new(),
            ticket_id,
            message_id,
            file_name: file_name.to_owned(),
            file_path: key,
            file_size: data.len() as u64,
            mime_type: mime_type.to_owned(),
            uploaded_by: requester.display(),
            created_at: self.clock.now(),
        };
        self.store.insert_attachment(&attachment).await?;
        Ok(attachment)
    }

    /// Fetch the bytes and metadata, under the same ownership rule as
    /// upload.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`], [`Error::Forbidden`]
    pub async fn download(
        &self,
        attachment_id: AttachmentId,
        requester: &Requester,
    ) -> vdesk_common::Result<(Vec<u8>, Attachment)> {
        let attachment = self
            .store
            .attachment(attachment_id)
            .await?
            .ok_or_else(|| Error::not_found("attachment", attachment_id))?;
        let ticket = self
            .store
            .ticket(attachment.ticket_id)
            .await?
            .ok_or_else(|| Error::not_found("ticket", attachment.ticket_id))?;
        if !requester.may_access(&ticket) {
            return Err(Error::Forbidden("not allowed on this ticket".to_owned()));
        }

        let data = self
            .blob
            .get(attachment.file_path.as_str())
            .await
            .map_err(|error| Error::Transient(error.to_string()))?;
        Ok((data, attachment))
    }

    /// Remove blob and row; allowed for the uploader and for admins of the
    /// ticket's organization.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`], [`Error::Forbidden`]
    pub async fn delete(
        &self,
        attachment_id: AttachmentId,
        requester: &Requester,
    ) -> vdesk_common::Result<()> {
        let attachment = self
            .store
            .attachment(attachment_id)
            .await?
            .ok_or_else(|| Error::not_found("attachment", attachment_id))?;
        let ticket = self
            .store
            .ticket(attachment.ticket_id)
            .await?
            .ok_or_else(|| Error::not_found("ticket", attachment.ticket_id))?;

        let is_uploader = attachment.uploaded_by == requester.display();
        let is_admin = matches!(requester, Requester::Admin { .. } | Requester::System)
            && requester.may_access(&ticket);
        if !is_uploader && !is_admin {
            return Err(Error::Forbidden(
                "only the uploader or an admin may delete".to_owned(),
            ));
        }

        self.blob
            .delete(attachment.file_path.as_str())
            .await
            .map_err(|error| Error::Transient(error.to_string()))?;
        self.store.delete_attachment(attachment_id).await?;
        Ok(())
    }

    /// Drop every attachment of a ticket, blob first; used by the purger.
    ///
    /// # Errors
    ///
    /// * store or blob failure (the purger retries on its next tick)
    pub(crate) async fn remove_all(&self, ticket_id: TicketId) -> vdesk_common::Result<()> {
        for attachment in self.store.attachments(ticket_id).await? {
            match self.blob.delete(attachment.file_path.as_str()).await {
                // a vanished blob must not wedge the purge forever.
                Ok(()) | Err(vdesk_common::BlobError::NotFound(_)) => {}
                Err(error) => return Err(Error::Transient(error.to_string())),
            }
            self.store.delete_attachment(attachment.id).await?;
        }
        Ok(())
    }
}
