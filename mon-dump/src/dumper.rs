use core::sync::atomic::{AtomicU32, Ordering};

use mon_segment::{Owner, SegmentError, SegmentGuard};
use tracing::debug;

use crate::codec::{DumpRecord, DumpSink, Writer};
use crate::schema::{
    activity, attachments, calls, context_variables, database, io_stats, memory_usage,
    record_stats, statements, transactions, Relation, StatGroup,
};
use crate::state::{
    AttachmentState, Attachments, DatabaseInfo, MemoryStats, Request, RuntimeStats, TransactionState,
};
use crate::GlobalId;

/// Hands out statistics ids unique across all processes of a database.
#[derive(Debug)]
pub struct StatIds {
    process_id: u32,
    counter: AtomicU32,
}

/// Writes the monitoring state of the local process.
pub struct LocalDumper<'lt> {
    owner: Owner,
    ids: &'lt StatIds,
    /// With a shared page cache every attachment accounts its own memory.
    shared_cache: bool,
}

impl StatIds {
    pub fn new(process_id: u32) -> Self {
        StatIds {
            process_id,
            counter: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> GlobalId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        GlobalId::new(self.process_id, counter)
    }
}

impl<'lt> LocalDumper<'lt> {
    pub fn new(owner: Owner, ids: &'lt StatIds, shared_cache: bool) -> Self {
        LocalDumper {
            owner,
            ids,
            shared_cache,
        }
    }

    /// Replace the element of our owner with a fresh dump.
    ///
    /// The dump is encoded completely before it is committed to the segment. On error no element
    /// of our owner remains, readers never see a partial dump.
    pub fn dump_self(
        &self,
        guard: &mut SegmentGuard<'_>,
        database: &DatabaseInfo,
        attachments: &Attachments,
    ) -> Result<(), SegmentError> {
        let mut writer = Writer::new(Vec::with_capacity(1024));
        match self.dump_into(&mut writer, database, attachments) {
            Ok(()) => {}
            Err(never) => match never {},
        }
        let dump = writer.into_inner();

        let stale = guard.remove_owner(self.owner);
        let offset = guard.begin_write(self.owner)?;
        if let Err(err) = guard.append(offset, &dump) {
            guard.remove_owner(self.owner);
            return Err(err);
        }

        debug!(owner = %self.owner, stale, length = dump.len(), "dumped monitoring data");
        Ok(())
    }

    /// Write the database record followed by every attachment with its descendants.
    pub fn dump_into<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        database: &DatabaseInfo,
        attachments: &Attachments,
    ) -> Result<(), S::Error> {
        self.put_database(writer, database)?;

        // Do not hold the list while waiting for an attachment.
        let user = attachments.user.lock().clone();
        for attachment in &user {
            let state = attachment.lock();
            self.dump_attachment(writer, &state, database)?;
        }

        let system = attachments.system.read();
        for attachment in system.iter() {
            let state = attachment.lock();
            self.dump_attachment(writer, &state, database)?;
        }

        Ok(())
    }

    fn dump_attachment<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        attachment: &AttachmentState,
        db: &DatabaseInfo,
    ) -> Result<(), S::Error> {
        if !self.put_attachment(writer, attachment, db)? {
            return Ok(());
        }

        self.put_context_vars(writer, &attachment.context_vars, attachment.id, true)?;

        for transaction in &attachment.transactions {
            self.put_transaction(writer, transaction, attachment.id)?;
            self.put_context_vars(writer, &transaction.context_vars, transaction.number, false)?;
        }

        for transaction in &attachment.transactions {
            let stack = &transaction.call_stack;
            // The outermost request is the statement itself, not a call.
            for (depth, request) in stack.iter().enumerate().skip(1) {
                if !request.is_hidden() {
                    self.put_call(writer, request, &stack[0], &stack[depth - 1])?;
                }
            }
        }

        for request in &attachment.requests {
            if !request.is_hidden() {
                self.put_request(writer, request, attachment.id)?;
            }
        }

        Ok(())
    }

    fn put_database<S: DumpSink>(&self, writer: &mut Writer<S>, db: &DatabaseInfo) -> Result<(), S::Error> {
        let stat_id = self.ids.next();

        let mut record = DumpRecord::database(&db.name);
        record
            .store_integer(database::PAGE_SIZE, db.page_size)
            .store_integer(database::ODS_MAJOR, db.ods_major)
            .store_integer(database::ODS_MINOR, db.ods_minor)
            .store_integer(database::OLDEST_INTERESTING, db.oldest_interesting)
            .store_integer(database::OLDEST_ACTIVE, db.oldest_active)
            .store_integer(database::OLDEST_SNAPSHOT, db.oldest_snapshot)
            .store_integer(database::NEXT_TRANSACTION, db.next_transaction)
            .store_integer(database::PAGE_BUFFERS, db.page_buffers)
            .store_integer(database::SQL_DIALECT, if db.dialect_3 { 3 } else { 1 })
            .store_integer(database::SHUTDOWN_MODE, db.shutdown as i64)
            .store_integer(database::SWEEP_INTERVAL, db.sweep_interval)
            .store_integer(database::READ_ONLY, i64::from(db.read_only))
            .store_integer(database::FORCED_WRITES, i64::from(db.forced_writes))
            .store_integer(database::RESERVE_SPACE, i64::from(!db.no_reserve))
            .store_timestamp(database::CREATION_DATE, db.created)
            .store_integer(database::PAGES, db.pages)
            .store_integer(database::BACKUP_STATE, db.backup_state as i64)
            .store_global_id(database::STAT_ID, stat_id);
        writer.put_record(&record)?;

        self.put_statistics(writer, &db.stats, stat_id, StatGroup::Database)?;
        let memory = if self.shared_cache { db.memory } else { MemoryStats::default() };
        self.put_memory_usage(writer, &memory, stat_id, StatGroup::Database)
    }

    /// Returns `false` if the attachment is not reported at all.
    fn put_attachment<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        attachment: &AttachmentState,
        db: &DatabaseInfo,
    ) -> Result<bool, S::Error> {
        let Some(user) = &attachment.user else {
            return Ok(false);
        };

        let stat_id = self.ids.next();
        let state = if attachment.is_active() { activity::ACTIVE } else { activity::IDLE };

        let mut record = DumpRecord::attachment(&user.name);
        record
            .store_integer(attachments::ID, attachment.id)
            .store_integer(attachments::SERVER_PID, i64::from(self.owner.process_id))
            .store_integer(attachments::STATE, state)
            .store_string(attachments::NAME, &attachment.filename)
            .store_string(attachments::ROLE, &user.role)
            .store_string(attachments::REMOTE_PROTOCOL, &attachment.remote_protocol)
            .store_string(attachments::REMOTE_ADDRESS, &attachment.remote_address);
        if attachment.remote_pid != 0 {
            record.store_integer(attachments::REMOTE_PID, attachment.remote_pid);
        }
        record
            .store_string(attachments::REMOTE_PROCESS, &attachment.remote_process)
            .store_integer(attachments::CHARACTER_SET_ID, attachment.charset_id)
            .store_timestamp(attachments::TIMESTAMP, attachment.timestamp)
            .store_integer(attachments::GARBAGE_COLLECTION, i64::from(!attachment.no_cleanup))
            .store_global_id(attachments::STAT_ID, stat_id);
        writer.put_record(&record)?;

        self.put_statistics(writer, &attachment.stats, stat_id, StatGroup::Attachment)?;
        let memory = if self.shared_cache { attachment.memory } else { db.memory };
        self.put_memory_usage(writer, &memory, stat_id, StatGroup::Attachment)?;

        Ok(true)
    }

    fn put_transaction<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        transaction: &TransactionState,
        attachment_id: i64,
    ) -> Result<(), S::Error> {
        let stat_id = self.ids.next();
        let state = if transaction.is_active() { activity::ACTIVE } else { activity::IDLE };

        let mut record = DumpRecord::new(Relation::Transactions);
        record
            .store_integer(transactions::ID, transaction.number)
            .store_integer(transactions::ATTACHMENT_ID, attachment_id)
            .store_integer(transactions::STATE, state)
            .store_timestamp(transactions::TIMESTAMP, transaction.timestamp)
            .store_integer(transactions::TOP, transaction.top)
            .store_integer(transactions::OLDEST, transaction.oldest)
            .store_integer(transactions::OLDEST_ACTIVE, transaction.oldest_active)
            .store_integer(transactions::ISOLATION_MODE, transaction.isolation as i64)
            .store_integer(transactions::LOCK_TIMEOUT, transaction.lock_timeout)
            .store_integer(transactions::READ_ONLY, i64::from(transaction.read_only))
            .store_integer(transactions::AUTO_COMMIT, i64::from(transaction.auto_commit))
            .store_integer(transactions::AUTO_UNDO, i64::from(!transaction.no_auto_undo))
            .store_global_id(transactions::STAT_ID, stat_id);
        writer.put_record(&record)?;

        self.put_statistics(writer, &transaction.stats, stat_id, StatGroup::Transaction)?;
        self.put_memory_usage(writer, &transaction.memory, stat_id, StatGroup::Transaction)
    }

    fn put_request<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        request: &Request,
        attachment_id: i64,
    ) -> Result<(), S::Error> {
        let stat_id = self.ids.next();

        let mut record = DumpRecord::new(Relation::Statements);
        record
            .store_integer(statements::ID, request.id)
            .store_integer(statements::ATTACHMENT_ID, attachment_id);

        if request.active {
            let state = if request.stalled { activity::STALLED } else { activity::ACTIVE };
            record.store_integer(statements::STATE, state);
            if let Some(transaction) = request.transaction {
                record.store_integer(statements::TRANSACTION_ID, transaction);
            }
            record.store_timestamp(statements::TIMESTAMP, request.timestamp);
        } else {
            record.store_integer(statements::STATE, activity::IDLE);
        }

        if let Some(sql) = &request.sql_text {
            record.store_string(statements::SQL_TEXT, sql);
        }

        record.store_global_id(statements::STAT_ID, stat_id);
        writer.put_record(&record)?;

        self.put_statistics(writer, &request.stats, stat_id, StatGroup::Statement)?;
        self.put_memory_usage(writer, &request.memory, stat_id, StatGroup::Statement)
    }

    fn put_call<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        request: &Request,
        initial: &Request,
        caller: &Request,
    ) -> Result<(), S::Error> {
        let stat_id = self.ids.next();

        let mut record = DumpRecord::new(Relation::Calls);
        record
            .store_integer(calls::ID, request.id)
            .store_integer(calls::STATEMENT_ID, initial.id);
        if !core::ptr::eq(initial, caller) {
            record.store_integer(calls::CALLER_ID, caller.id);
        }

        if let Some(routine) = &request.routine {
            if let Some(package) = routine.package.as_deref().filter(|p| !p.is_empty()) {
                record.store_string(calls::PACKAGE_NAME, package);
            }
            record
                .store_string(calls::OBJECT_NAME, &routine.name)
                .store_integer(calls::OBJECT_TYPE, routine.kind as i64);
        } else if let Some(trigger) = request.trigger_name.as_deref().filter(|t| !t.is_empty()) {
            record
                .store_string(calls::OBJECT_NAME, trigger)
                .store_integer(calls::OBJECT_TYPE, crate::state::RoutineKind::Trigger as i64);
        } else {
            debug_assert!(false, "call frame {} is neither a routine nor a trigger", request.id);
        }

        record.store_timestamp(calls::TIMESTAMP, request.timestamp);
        if let Some((line, column)) = request.source {
            record
                .store_integer(calls::SOURCE_LINE, line)
                .store_integer(calls::SOURCE_COLUMN, column);
        }

        record.store_global_id(calls::STAT_ID, stat_id);
        writer.put_record(&record)?;

        self.put_statistics(writer, &request.stats, stat_id, StatGroup::Call)?;
        self.put_memory_usage(writer, &request.memory, stat_id, StatGroup::Call)
    }

    fn put_statistics<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        stats: &RuntimeStats,
        id: GlobalId,
        group: StatGroup,
    ) -> Result<(), S::Error> {
        let mut record = DumpRecord::new(Relation::IoStats);
        record
            .store_global_id(io_stats::STAT_ID, id)
            .store_integer(io_stats::STAT_GROUP, group as i64)
            .store_integer(io_stats::PAGE_READS, stats.page_reads)
            .store_integer(io_stats::PAGE_WRITES, stats.page_writes)
            .store_integer(io_stats::PAGE_FETCHES, stats.page_fetches)
            .store_integer(io_stats::PAGE_MARKS, stats.page_marks);
        writer.put_record(&record)?;

        let mut record = DumpRecord::new(Relation::RecordStats);
        record
            .store_global_id(record_stats::STAT_ID, id)
            .store_integer(record_stats::STAT_GROUP, group as i64)
            .store_integer(record_stats::SEQ_READS, stats.seq_reads)
            .store_integer(record_stats::IDX_READS, stats.idx_reads)
            .store_integer(record_stats::INSERTS, stats.inserts)
            .store_integer(record_stats::UPDATES, stats.updates)
            .store_integer(record_stats::DELETES, stats.deletes)
            .store_integer(record_stats::BACKOUTS, stats.backouts)
            .store_integer(record_stats::PURGES, stats.purges)
            .store_integer(record_stats::EXPUNGES, stats.expunges);
        writer.put_record(&record)
    }

    fn put_context_vars<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        variables: &std::collections::BTreeMap<String, String>,
        object_id: i64,
        is_attachment: bool,
    ) -> Result<(), S::Error> {
        for (name, value) in variables {
            let mut record = DumpRecord::new(Relation::ContextVariables);

            if is_attachment {
                record.store_integer(context_variables::ATTACHMENT_ID, object_id);
            } else {
                record.store_integer(context_variables::TRANSACTION_ID, object_id);
            }

            record
                .store_string(context_variables::NAME, name)
                .store_string(context_variables::VALUE, value);
            writer.put_record(&record)?;
        }

        Ok(())
    }

    fn put_memory_usage<S: DumpSink>(
        &self,
        writer: &mut Writer<S>,
        memory: &MemoryStats,
        id: GlobalId,
        group: StatGroup,
    ) -> Result<(), S::Error> {
        let mut record = DumpRecord::new(Relation::MemoryUsage);
        record
            .store_global_id(memory_usage::STAT_ID, id)
            .store_integer(memory_usage::STAT_GROUP, group as i64)
            .store_integer(memory_usage::CURRENT_USED, memory.current_used)
            .store_integer(memory_usage::CURRENT_ALLOCATED, memory.current_allocated)
            .store_integer(memory_usage::MAX_USED, memory.max_used)
            .store_integer(memory_usage::MAX_ALLOCATED, memory.max_allocated);
        writer.put_record(&record)
    }
}
