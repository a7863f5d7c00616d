use std::{collections::BTreeMap, sync::Arc};

use log::debug;

use crate::{
    error::{DbError, DbResult},
    index::{IndexJoinPlan, IndexSelectPlan},
    materialize::MergeJoinPlan,
    metadata::{IndexInfo, MetadataManager},
    multibuffer::MultiBufferProductPlan,
    parser::{Parser, QueryData},
    plan::{Plan, ProjectPlan, SelectPlan, TablePlan},
    planner::QueryPlanner,
    query::Predicate,
    record::Schema,
    transaction::Transaction,
};

/// Builds the candidate plans for one input of a query
///
/// Stored tables can use their indexes; a view is planned on its own and only joined
/// with products and merge joins.
struct TablePlanner {
    tx: Arc<Transaction>,
    plan: Arc<dyn Plan>,
    table_plan: Option<Arc<TablePlan>>,
    predicate: Predicate,
    schema: Schema,
    indexes: BTreeMap<String, IndexInfo>,
}

impl TablePlanner {
    fn for_table(
        table_name: &str,
        predicate: &Predicate,
        metadata: &MetadataManager,
        tx: &Arc<Transaction>,
    ) -> DbResult<Self> {
        let table_plan = Arc::new(TablePlan::new(Arc::clone(tx), table_name, metadata)?);
        let indexes = metadata.get_index_info(table_name, tx)?.into_iter().collect();
        Ok(Self {
            tx: Arc::clone(tx),
            plan: Arc::clone(&table_plan) as Arc<dyn Plan>,
            schema: table_plan.schema().clone(),
            table_plan: Some(table_plan),
            predicate: predicate.clone(),
            indexes,
        })
    }

    fn for_view(view_plan: Arc<dyn Plan>, predicate: &Predicate, tx: &Arc<Transaction>) -> Self {
        Self {
            tx: Arc::clone(tx),
            schema: view_plan.schema().clone(),
            plan: view_plan,
            table_plan: None,
            predicate: predicate.clone(),
            indexes: BTreeMap::new(),
        }
    }

    /// This input on its own, through an index when the predicate pins an indexed field
    fn make_select_plan(&self) -> Arc<dyn Plan> {
        let plan = self
            .make_index_select()
            .unwrap_or_else(|| Arc::clone(&self.plan));
        self.add_select_pred(plan)
    }

    /// This input joined to `current`, or `None` when no term relates the two
    fn make_join_plan(&self, current: &Arc<dyn Plan>) -> Option<Arc<dyn Plan>> {
        let current_schema = current.schema();
        self.predicate.join_sub_pred(&self.schema, current_schema)?;
        let plan = self
            .make_index_join(current, current_schema)
            .or_else(|| self.make_merge_join(current, current_schema))
            .unwrap_or_else(|| self.make_product_join(current, current_schema));
        Some(plan)
    }

    /// The product of `current` and this input
    fn make_product_plan(&self, current: &Arc<dyn Plan>) -> Arc<dyn Plan> {
        let plan = self.add_select_pred(Arc::clone(&self.plan));
        Arc::new(MultiBufferProductPlan::new(
            Arc::clone(&self.tx),
            Arc::clone(current),
            plan,
        ))
    }

    fn make_index_select(&self) -> Option<Arc<dyn Plan>> {
        let table_plan = self.table_plan.as_ref()?;
        self.indexes.iter().find_map(|(field, index_info)| {
            let value = self.predicate.equates_with_constant(field)?;
            debug!("index {} selects {field} = {value}", index_info.index_name());
            Some(Arc::new(IndexSelectPlan::new(
                Arc::clone(table_plan),
                index_info.clone(),
                value.clone(),
            )) as Arc<dyn Plan>)
        })
    }

    fn make_index_join(
        &self,
        current: &Arc<dyn Plan>,
        current_schema: &Schema,
    ) -> Option<Arc<dyn Plan>> {
        let table_plan = self.table_plan.as_ref()?;
        let (index_info, outer_field) = self.indexes.iter().find_map(|(field, index_info)| {
            let outer_field = self.predicate.equates_with_field(field)?;
            current_schema
                .has_field(outer_field)
                .then_some((index_info, outer_field))
        })?;
        debug!("index {} joins on {outer_field}", index_info.index_name());
        let plan = Arc::new(IndexJoinPlan::new(
            Arc::clone(current),
            Arc::clone(table_plan),
            index_info.clone(),
            outer_field,
        ));
        let plan = self.add_select_pred(plan);
        Some(self.add_join_pred(plan, current_schema))
    }

    fn make_merge_join(
        &self,
        current: &Arc<dyn Plan>,
        current_schema: &Schema,
    ) -> Option<Arc<dyn Plan>> {
        let field = self
            .predicate
            .natural_join_field(current_schema, &self.schema)?;
        debug!("merge join on {field}");
        let right = self.add_select_pred(Arc::clone(&self.plan));
        let plan = Arc::new(MergeJoinPlan::new(
            Arc::clone(&self.tx),
            Arc::clone(current),
            right,
            &field,
            &field,
        ));
        Some(self.add_join_pred(plan, current_schema))
    }

    fn make_product_join(
        &self,
        current: &Arc<dyn Plan>,
        current_schema: &Schema,
    ) -> Arc<dyn Plan> {
        let plan = self.make_product_plan(current);
        self.add_join_pred(plan, current_schema)
    }

    fn add_select_pred(&self, plan: Arc<dyn Plan>) -> Arc<dyn Plan> {
        match self.predicate.select_sub_pred(&self.schema) {
            Some(predicate) => Arc::new(SelectPlan::new(plan, predicate)),
            None => plan,
        }
    }

    fn add_join_pred(&self, plan: Arc<dyn Plan>, current_schema: &Schema) -> Arc<dyn Plan> {
        match self.predicate.join_sub_pred(current_schema, &self.schema) {
            Some(predicate) => Arc::new(SelectPlan::new(plan, predicate)),
            None => plan,
        }
    }
}

/// Greedy join ordering
///
/// Starts from the input whose selection yields the fewest rows, then repeatedly adds
/// the join with the smallest output, falling back to a product when no remaining input
/// is related to the plan built so far.
pub struct HeuristicQueryPlanner {
    metadata: Arc<MetadataManager>,
}

impl HeuristicQueryPlanner {
    pub fn new(metadata: Arc<MetadataManager>) -> Self {
        Self { metadata }
    }

    /// The candidate with the fewest output rows, the first one on ties
    fn lowest(
        candidates: impl IntoIterator<Item = (usize, Arc<dyn Plan>)>,
    ) -> Option<(usize, Arc<dyn Plan>)> {
        let mut best: Option<(usize, Arc<dyn Plan>)> = None;
        for (position, plan) in candidates {
            let better = best
                .as_ref()
                .map_or(true, |(_, lowest)| plan.records_output() < lowest.records_output());
            if better {
                best = Some((position, plan));
            }
        }
        best
    }
}

impl QueryPlanner for HeuristicQueryPlanner {
    fn create_plan(&self, data: &QueryData, tx: &Arc<Transaction>) -> DbResult<Arc<dyn Plan>> {
        let mut planners = Vec::with_capacity(data.tables.len());
        for table_name in &data.tables {
            let planner = match self.metadata.get_view_def(table_name, tx)? {
                Some(view_def) => {
                    let view_data = Parser::new(&view_def)?.parse_query()?;
                    let view_plan = self.create_plan(&view_data, tx)?;
                    TablePlanner::for_view(view_plan, &data.predicate, tx)
                }
                None => TablePlanner::for_table(table_name, &data.predicate, &self.metadata, tx)?,
            };
            planners.push(planner);
        }

        let seeds = planners
            .iter()
            .enumerate()
            .map(|(i, planner)| (i, planner.make_select_plan()));
        let (seed, mut current) = Self::lowest(seeds)
            .ok_or_else(|| DbError::Schema("a query needs at least one table".to_string()))?;
        planners.remove(seed);

        while !planners.is_empty() {
            let joins = planners
                .iter()
                .enumerate()
                .filter_map(|(i, planner)| Some((i, planner.make_join_plan(&current)?)));
            let (next, plan) = match Self::lowest(joins) {
                Some(join) => join,
                None => {
                    let products = planners
                        .iter()
                        .enumerate()
                        .map(|(i, planner)| (i, planner.make_product_plan(&current)));
                    Self::lowest(products)
                        .ok_or_else(|| DbError::Schema("no input left to join".to_string()))?
                }
            };
            current = plan;
            planners.remove(next);
        }
        Ok(Arc::new(ProjectPlan::new(current, &data.fields)?))
    }
}
